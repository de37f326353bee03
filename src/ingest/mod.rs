//! Ingest side of the bridge: wire protocol, per-connection transport, and
//! the loopback HTTP/WebSocket server.

pub mod connection;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod snapshots;

use crate::capture::CaptureDispatcher;
use crate::config::BridgeConfig;
use crate::store::Store;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

/// Connection-level counters surfaced by `/stats`.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub active_connections: AtomicU64,
    pub total_connections: AtomicU64,
    pub frames_received: AtomicU64,
    pub batches_persisted: AtomicU64,
    pub outbound_dropped: AtomicU64,
    pub events_dropped_safe_mode: AtomicU64,
}

/// State shared by every connection, HTTP handler, and tool handler.
pub struct AppState {
    pub config: BridgeConfig,
    pub store: Arc<Store>,
    pub dispatcher: Arc<CaptureDispatcher>,
    pub metrics: IngestMetrics,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: BridgeConfig, store: Arc<Store>, dispatcher: Arc<CaptureDispatcher>) -> Self {
        Self {
            config,
            store,
            dispatcher,
            metrics: IngestMetrics::default(),
            started_at: Instant::now(),
        }
    }
}
