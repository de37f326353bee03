//! Launch supervision: single-instance locking, port reservation with
//! stale-bridge recovery, readiness probing, and stop.
//!
//! Failure codes are stable strings (`MCP_STARTUP_*`, `MCP_STOP_*`) written
//! to standard error by the launcher binary.

use crate::config::BridgeConfig;
use crate::BRIDGE_NAME;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

pub const CODE_LOCKED: &str = "MCP_STARTUP_LOCKED";
pub const CODE_PORT_IN_USE: &str = "MCP_STARTUP_PORT_IN_USE";
pub const CODE_FAILED: &str = "MCP_STARTUP_FAILED";
pub const CODE_STOP_NOT_RUNNING: &str = "MCP_STOP_NOT_RUNNING";
pub const CODE_STOP_FAILED: &str = "MCP_STOP_FAILED";

/// Release-wait schedule after terminating a stale bridge: 12 x 200 ms.
const RELEASE_ATTEMPTS: u32 = 12;
const RELEASE_TICK: Duration = Duration::from_millis(200);

/// Readiness poll tick.
const READY_TICK: Duration = Duration::from_millis(200);

/// Supervisor failures, each with its stable code.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("another bridge start holds the lock (pid {pid})")]
    Locked { pid: u32 },
    #[error("port {port} is in use and could not be reclaimed")]
    PortInUse { port: u16 },
    #[error("bridge did not become ready within {timeout_ms} ms")]
    ReadinessTimeout { timeout_ms: u64 },
    #[error("bridge runtime exited during startup")]
    RuntimeExited,
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl LaunchError {
    pub fn code(&self) -> &'static str {
        match self {
            LaunchError::Locked { .. } => CODE_LOCKED,
            LaunchError::PortInUse { .. } => CODE_PORT_IN_USE,
            _ => CODE_FAILED,
        }
    }
}

/// Payload written into the lockfile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockPayload {
    pub pid: u32,
    pub created_at: i64,
    pub command: String,
}

/// Held single-instance lock. Released on drop when the pid still matches.
#[derive(Debug)]
pub struct StartLock {
    path: PathBuf,
    pid: u32,
}

impl StartLock {
    /// Acquire the lockfile with exclusive create.
    ///
    /// On contention the referenced pid is probed; a dead holder is
    /// unlinked and acquisition retried exactly once.
    pub fn acquire(config: &BridgeConfig, command: &str) -> Result<Self, LaunchError> {
        config.ensure_dirs()?;
        let path = config.lockfile();

        for attempt in 0..2 {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    let payload = LockPayload {
                        pid: std::process::id(),
                        created_at: chrono::Utc::now().timestamp_millis(),
                        command: command.to_string(),
                    };
                    let body = serde_json::to_string(&payload)
                        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    file.write_all(body.as_bytes())?;
                    return Ok(Self {
                        path,
                        pid: payload.pid,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = read_lock_payload(&path);
                    match holder {
                        Some(payload) if pid_alive(payload.pid) => {
                            return Err(LaunchError::Locked { pid: payload.pid });
                        }
                        _ if attempt == 0 => {
                            // Stale or unreadable: unlink and retry once
                            tracing::debug!(path = %path.display(), "removing stale start lock");
                            let _ = std::fs::remove_file(&path);
                        }
                        _ => {
                            return Err(LaunchError::Locked {
                                pid: holder.map(|p| p.pid).unwrap_or(0),
                            });
                        }
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LaunchError::Locked { pid: 0 })
    }
}

impl Drop for StartLock {
    fn drop(&mut self) {
        // Release only when the file still names this process
        if let Some(payload) = read_lock_payload(&self.path) {
            if payload.pid == self.pid {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

fn read_lock_payload(path: &std::path::Path) -> Option<LockPayload> {
    let body = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&body).ok()
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    if pid == 0 || pid > i32::MAX as u32 {
        return false;
    }
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate(pid: u32) {
    unsafe {
        libc::kill(pid as i32, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) {}

/// What the port probe found listening on the configured port.
#[derive(Debug)]
pub enum PortStatus {
    Free,
    Bridge { pid: Option<u32> },
    Foreign,
}

fn probe_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap_or_default()
}

/// Probe the configured port and classify its occupant.
pub async fn probe_port(config: &BridgeConfig) -> PortStatus {
    if tokio::net::TcpStream::connect(config.bind_addr())
        .await
        .is_err()
    {
        return PortStatus::Free;
    }

    let client = probe_client();
    let base = config.base_url();

    if let Ok(response) = client.get(format!("{base}/health")).send().await {
        if let Ok(body) = response.json::<serde_json::Value>().await {
            let looks_like_bridge = body.get("status").and_then(|v| v.as_str()) == Some("ok")
                && body.get("websocket").is_some();
            if looks_like_bridge {
                let pid = body
                    .get("pid")
                    .and_then(|v| v.as_u64())
                    .and_then(|v| u32::try_from(v).ok());
                return PortStatus::Bridge { pid };
            }
        }
    }

    if let Ok(response) = client.get(format!("{base}/")).send().await {
        if let Ok(body) = response.json::<serde_json::Value>().await {
            if body
                .get("name")
                .and_then(|v| v.as_str())
                .map(|name| name.contains(BRIDGE_NAME))
                .unwrap_or(false)
            {
                return PortStatus::Bridge { pid: None };
            }
        }
    }

    PortStatus::Foreign
}

/// Reserve the port, terminating a stale bridge occupant if needed.
pub async fn reserve_port(config: &BridgeConfig) -> Result<(), LaunchError> {
    match probe_port(config).await {
        PortStatus::Free => Ok(()),
        PortStatus::Foreign => Err(LaunchError::PortInUse { port: config.port }),
        PortStatus::Bridge { pid } => {
            let Some(pid) = pid else {
                return Err(LaunchError::PortInUse { port: config.port });
            };
            tracing::info!(pid, port = config.port, "terminating stale bridge on port");
            terminate(pid);
            for _ in 0..RELEASE_ATTEMPTS {
                tokio::time::sleep(RELEASE_TICK).await;
                if tokio::net::TcpStream::connect(config.bind_addr())
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }
            Err(LaunchError::PortInUse { port: config.port })
        }
    }
}

/// Whether `/health` currently reports a ready bridge.
pub async fn health_ready(config: &BridgeConfig) -> bool {
    let client = probe_client();
    let Ok(response) = client
        .get(format!("{}/health", config.base_url()))
        .send()
        .await
    else {
        return false;
    };
    let Ok(body) = response.json::<serde_json::Value>().await else {
        return false;
    };
    body.get("status").and_then(|v| v.as_str()) == Some("ok") && body.get("websocket").is_some()
}

/// Poll `/health` until ready, the runtime exits, or the timeout elapses.
pub async fn wait_ready(
    config: &BridgeConfig,
    child: &mut tokio::process::Child,
) -> Result<(), LaunchError> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(config.startup_timeout_ms);

    loop {
        if let Some(status) = child.try_wait()? {
            tracing::error!(?status, "bridge runtime exited during startup");
            return Err(LaunchError::RuntimeExited);
        }
        if health_ready(config).await {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LaunchError::ReadinessTimeout {
                timeout_ms: config.startup_timeout_ms,
            });
        }
        tokio::time::sleep(READY_TICK).await;
    }
}

/// Stop a running bridge identified through `/health`.
///
/// Returns Ok(false) when nothing bridge-shaped occupies the port.
pub async fn stop_running_bridge(config: &BridgeConfig) -> Result<bool, LaunchError> {
    match probe_port(config).await {
        PortStatus::Free | PortStatus::Foreign => Ok(false),
        PortStatus::Bridge { pid: None } => Err(LaunchError::PortInUse { port: config.port }),
        PortStatus::Bridge { pid: Some(pid) } => {
            terminate(pid);
            for _ in 0..RELEASE_ATTEMPTS {
                tokio::time::sleep(RELEASE_TICK).await;
                if tokio::net::TcpStream::connect(config.bind_addr())
                    .await
                    .is_err()
                {
                    return Ok(true);
                }
            }
            Err(LaunchError::PortInUse { port: config.port })
        }
    }
}
