//! MCP runtime: JSON-RPC over standard streams, the tool registry, input
//! schemas, and the response envelope.
//!
//! Standard output carries protocol frames only; diagnostics go to standard
//! error through `tracing`.

pub mod envelope;
pub mod registry;
pub mod rpc;
pub mod schema;
pub mod tools;
