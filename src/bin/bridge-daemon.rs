// bridge-daemon: the bridge runtime
//
// Responsibilities:
// - Open and migrate the embedded store under DATA_DIR
// - Serve the loopback HTTP/WebSocket ingest endpoints
// - Answer MCP tool calls over stdin/stdout
// - Shut down when the MCP host closes stdin or on SIGTERM, resolving
//   pending capture waiters with connection_lost

use anyhow::{Context, Result};
use browser_bridge::capture::CaptureDispatcher;
use browser_bridge::config::BridgeConfig;
use browser_bridge::error::ErrorKind;
use browser_bridge::ingest::{server, AppState};
use browser_bridge::mcp::rpc;
use browser_bridge::store::Store;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(config: &BridgeConfig) {
    // Stdout belongs to the MCP protocol; all diagnostics go to stderr.
    // Stdio mode additionally quiets per-request HTTP noise.
    let default_filter = if config.stdio_mode {
        "info,hyper=warn,tower=warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let standalone = std::env::args().any(|arg| arg == "--standalone");
    let config = BridgeConfig::from_env();
    init_tracing(&config);

    config
        .ensure_dirs()
        .context("Failed to create data directory")?;

    let store = Arc::new(
        Store::open(&config.database_file()).with_context(|| {
            format!(
                "Failed to open store at {}",
                config.database_file().display()
            )
        })?,
    );
    let dispatcher = Arc::new(CaptureDispatcher::new());
    let state = Arc::new(AppState::new(config.clone(), store, dispatcher));

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr()))?;
    tracing::info!(addr = %config.bind_addr(), "ingest server listening");

    let server_task = {
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(err) = server::serve(state, listener).await {
                tracing::error!(error = %err, "ingest server stopped");
            }
        })
    };

    // The runtime ends on host disconnect (stdin EOF), SIGTERM, or Ctrl-C;
    // whichever comes first.
    if standalone {
        tracing::info!("running standalone: HTTP only, no MCP stdio loop");
        wait_for_signal().await;
    } else {
        let stdio = rpc::run_stdio_loop(state.clone());
        tokio::select! {
            result = stdio => {
                if let Err(err) = result {
                    tracing::error!(error = %err, "mcp stdio loop failed");
                }
            }
            _ = wait_for_signal() => {}
        }
    }

    tracing::info!("shutting down bridge");
    state.dispatcher.resolve_all_pending(ErrorKind::ConnectionLost);
    server_task.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = term.recv() => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
