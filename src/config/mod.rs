//! Server configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or none at all) is a valid
//! configuration:
//!
//! ```toml
//! listen = "127.0.0.1:8080"   # or a UNIX socket path such as "/tmp/remux.sock"
//! x_headers = false           # trust X-Real-IP / X-Forwarded-For
//! gzip = false
//! log_filter = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP `host:port`, or a filesystem path for a UNIX socket.
    pub listen: String,
    /// Take the client address from `X-Real-IP` / `X-Forwarded-For`.
    pub x_headers: bool,
    /// Enable the gzip middleware.
    pub gzip: bool,
    /// Default `tracing-subscriber` filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            x_headers: false,
            gzip: false,
            log_filter: "info".to_owned(),
        }
    }
}

impl ServerConfig {
    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
