// bridge-launch: launch supervisor for the bridge runtime
//
// Acquires the single-instance lock, reserves the loopback port (recovering
// a stale bridge when one is found), spawns bridge-daemon with stdio passed
// through to the MCP host, and polls /health until ready. Exit code 0 on a
// clean run, 1 on lock contention, port contention, or a runtime crash.

use anyhow::{Context, Result};
use browser_bridge::config::BridgeConfig;
use browser_bridge::launch::{
    self, StartLock, CODE_FAILED, CODE_STOP_FAILED, CODE_STOP_NOT_RUNNING,
};
use clap::Parser;
use std::path::PathBuf;
use std::process::Stdio;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bridge-launch", about = "Start the local browser-debug bridge")]
struct Cli {
    /// Runtime flavor; retained for compatibility, all flavors spawn the
    /// bridge-daemon binary next to this executable
    #[arg(long, default_value = "dist", value_parser = ["tsx", "dist", "nx"])]
    mode: String,

    /// Print what would happen without starting anything
    #[arg(long)]
    dry_run: bool,

    /// Run without an MCP host: HTTP/WebSocket only, stdin ignored
    #[arg(long)]
    standalone: bool,

    /// Stop a running bridge instead of starting one
    #[arg(long)]
    stop: bool,
}

fn daemon_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot resolve current executable")?;
    let dir = exe
        .parent()
        .context("executable has no parent directory")?;
    Ok(dir.join("bridge-daemon"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig::from_env();

    let exit_code = if cli.stop {
        run_stop(&config).await
    } else {
        run_start(&cli, &config).await
    };
    std::process::exit(exit_code);
}

async fn run_stop(config: &BridgeConfig) -> i32 {
    match launch::stop_running_bridge(config).await {
        Ok(true) => {
            eprintln!("bridge on port {} stopped", config.port);
            0
        }
        Ok(false) => {
            eprintln!("{CODE_STOP_NOT_RUNNING}: no bridge found on port {}", config.port);
            0
        }
        Err(err) => {
            eprintln!("{CODE_STOP_FAILED}: {err}");
            1
        }
    }
}

async fn run_start(cli: &Cli, config: &BridgeConfig) -> i32 {
    let daemon = match daemon_path() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("{CODE_FAILED}: {err}");
            return 1;
        }
    };

    if cli.dry_run {
        eprintln!(
            "dry run: would start {} (mode={}) on port {} with data dir {}",
            daemon.display(),
            cli.mode,
            config.port,
            config.data_dir.display()
        );
        return 0;
    }

    // Single-instance lock for the whole start sequence
    let _lock = match StartLock::acquire(config, &format!("bridge-launch --mode={}", cli.mode)) {
        Ok(lock) => lock,
        Err(err) => {
            eprintln!("{}: {err}", err.code());
            return 1;
        }
    };

    if let Err(err) = launch::reserve_port(config).await {
        eprintln!("{}: {err}", err.code());
        return 1;
    }

    let mut command = tokio::process::Command::new(&daemon);
    command
        .env("PORT", config.port.to_string())
        .env("DATA_DIR", &config.data_dir)
        .stderr(Stdio::inherit());
    if cli.standalone {
        command
            .arg("--standalone")
            .stdin(Stdio::null())
            .stdout(Stdio::inherit());
    } else {
        // MCP frames flow host <-> daemon untouched
        command
            .env("MCP_STDIO_MODE", "1")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit());
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            eprintln!("{CODE_FAILED}: failed to spawn {}: {err}", daemon.display());
            return 1;
        }
    };

    if let Err(err) = launch::wait_ready(config, &mut child).await {
        eprintln!("{}: {err}", err.code());
        terminate_child(&child);
        let _ = child.wait().await;
        return 1;
    }
    tracing::info!(port = config.port, "bridge ready");

    // Supervise until the runtime exits or we are asked to stop
    let status = tokio::select! {
        status = child.wait() => status,
        _ = wait_for_signal() => {
            terminate_child(&child);
            child.wait().await
        }
    };

    match status {
        Ok(status) if status.success() => 0,
        Ok(status) => {
            eprintln!("{CODE_FAILED}: bridge runtime exited with {status}");
            1
        }
        Err(err) => {
            eprintln!("{CODE_FAILED}: {err}");
            1
        }
    }
}

#[cfg(unix)]
fn terminate_child(child: &tokio::process::Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate_child(_child: &tokio::process::Child) {}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
