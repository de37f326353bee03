// Environment configuration for the bridge daemon and launcher
// Handles the data directory, port selection, and startup tuning knobs

use std::path::PathBuf;

/// Default loopback port for the ingest server.
pub const DEFAULT_PORT: u16 = 8065;

/// Default readiness timeout for the launcher (ms).
pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 15_000;

/// Floor for `MCP_STARTUP_TIMEOUT_MS`; smaller values are clamped up.
pub const MIN_STARTUP_TIMEOUT_MS: u64 = 1_000;

/// Configuration for bridge paths and settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Directory for durable state (SQLite file, lockfile)
    pub data_dir: PathBuf,
    /// Loopback port the ingest server binds
    pub port: u16,
    /// Launcher readiness timeout in milliseconds
    pub startup_timeout_ms: u64,
    /// When true, stdout carries MCP protocol frames only and HTTP request
    /// logging is suppressed
    pub stdio_mode: bool,
}

impl BridgeConfig {
    /// Create configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::default_data_dir());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let startup_timeout_ms = std::env::var("MCP_STARTUP_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS)
            .max(MIN_STARTUP_TIMEOUT_MS);

        let stdio_mode = std::env::var("MCP_STDIO_MODE")
            .map(|v| v.trim() == "1")
            .unwrap_or(false);

        Self {
            data_dir,
            port,
            startup_timeout_ms,
            stdio_mode,
        }
    }

    fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|d| d.join("browser-bridge"))
            .unwrap_or_else(|| PathBuf::from("data"))
    }

    /// Path of the embedded SQLite database
    pub fn database_file(&self) -> PathBuf {
        self.data_dir.join("bridge.db")
    }

    /// Path of the single-instance launch lockfile
    pub fn lockfile(&self) -> PathBuf {
        self.data_dir.join(".mcp-start.lock")
    }

    /// Loopback address the ingest server binds
    pub fn bind_addr(&self) -> std::net::SocketAddr {
        std::net::SocketAddr::from(([127, 0, 0, 1], self.port))
    }

    /// Base URL of the ingest server, used by launcher probes
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Ensure the data directory exists
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_for(dir: &TempDir) -> BridgeConfig {
        BridgeConfig {
            data_dir: dir.path().to_path_buf(),
            port: DEFAULT_PORT,
            startup_timeout_ms: DEFAULT_STARTUP_TIMEOUT_MS,
            stdio_mode: false,
        }
    }

    #[test]
    fn test_derived_paths() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);

        assert_eq!(config.database_file(), temp.path().join("bridge.db"));
        assert_eq!(config.lockfile(), temp.path().join(".mcp-start.lock"));
        assert_eq!(config.base_url(), "http://127.0.0.1:8065");
    }

    #[test]
    fn test_bind_addr_is_loopback() {
        let temp = TempDir::new().unwrap();
        let config = config_for(&temp);
        assert!(config.bind_addr().ip().is_loopback());
    }

    #[test]
    fn test_ensure_dirs_creates_nested() {
        let temp = TempDir::new().unwrap();
        let mut config = config_for(&temp);
        config.data_dir = temp.path().join("a").join("b");
        config.ensure_dirs().unwrap();
        assert!(config.data_dir.is_dir());
    }
}
