use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mongodb_uri: String,
    pub listen_address: String,
    pub namespace: String,
    pub collect_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_uri: "mongodb://127.0.0.1:27017".to_string(),
            listen_address: "127.0.0.1:9216".to_string(),
            namespace: "mongodb".to_string(),
            collect_timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Reads a JSON file; keys it omits keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies `OPWATCH_*` environment overrides.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("OPWATCH_MONGODB_URI") {
            self.mongodb_uri = v;
        }
        if let Ok(v) = std::env::var("OPWATCH_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("OPWATCH_NAMESPACE") {
            self.namespace = v;
        }
        if let Ok(v) = std::env::var("OPWATCH_COLLECT_TIMEOUT_MS") {
            self.collect_timeout_ms = v.parse::<u64>().map_err(|e| ConfigError::InvalidValue {
                field: "collect_timeout_ms",
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_metric_prefix(&self.namespace) {
            return Err(ConfigError::InvalidValue {
                field: "namespace",
                reason: format!("'{}' is not a valid metric name prefix", self.namespace),
            });
        }
        if self.collect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "collect_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen_address
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidValue {
                field: "listen_address",
                reason: e.to_string(),
            })
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }
}

fn is_metric_prefix(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
