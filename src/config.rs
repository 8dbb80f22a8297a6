//! Konfigurasi connection dan server
//!
//! Semua field punya default, file TOML cukup berisi yang ingin diubah:
//!
//! ```toml
//! socket_path = "/tmp/wirekit-test"
//! max_connections = 64
//!
//! [connection]
//! write_buffer_limit = 262144
//! trace_messages = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::protocol::MAX_MESSAGE_SIZE;

/// Per-connection limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest accepted inbound message, header included.
    pub max_message_size: usize,
    /// Size of the transport read buffer.
    pub read_buffer_size: usize,
    /// Outbound bytes allowed to pile up before sends fail.
    pub write_buffer_limit: usize,
    /// Log every message at debug level.
    pub trace_messages: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            read_buffer_size: 64 * 1024,
            write_buffer_limit: 1024 * 1024,
            trace_messages: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    /// Schema files; empty means the bundled protocols.
    pub schema_paths: Vec<PathBuf>,
    pub max_connections: usize,
    pub poll_timeout_ms: u64,
    pub verbose: bool,
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            schema_paths: Vec::new(),
            max_connections: 1024,
            poll_timeout_ms: 100,
            verbose: false,
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        info!("Configuration loaded from {:?}", path);
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

/// `$XDG_RUNTIME_DIR/wirekit-0`, atau `/run/user/<uid>/wirekit-0`.
pub fn default_socket_path() -> PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    PathBuf::from(runtime_dir).join("wirekit-0")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            socket_path = "/tmp/wk.sock"
            max_connections = 8

            [connection]
            trace_messages = true
            "#,
        )
        .unwrap();

        assert_eq!(config.socket_path, PathBuf::from("/tmp/wk.sock"));
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.poll_timeout_ms, 100);
        assert!(config.connection.trace_messages);
        assert_eq!(config.connection.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.toml");
        std::fs::write(&path, "max_connections = \"many\"").unwrap();

        let err = ServerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("server.toml"));

        let missing = ServerConfig::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }

    #[test]
    fn test_default_socket_name() {
        assert!(default_socket_path().ends_with("wirekit-0"));
    }
}
