//! Configuration structures.
//!
//! Configuration is loaded from JSON strings or files; every section falls back
//! to its defaults when omitted.

use super::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Global bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Bus attachment configuration.
    #[serde(default)]
    pub bus: BusConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Parse configuration from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

/// Bus attachment configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Application name passed to the native attachment.
    pub application_name: String,

    /// Whether messages from remote devices are accepted.
    pub allow_remote_messages: bool,

    /// Connect spec used when `connect` is given none.
    pub connect_spec: String,

    /// Default proxy method call timeout.
    #[serde(with = "humantime_serde")]
    pub method_call_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            application_name: "bus-bridge".to_string(),
            allow_remote_messages: true,
            connect_spec: "unix:abstract=alljoyn".to_string(),
            method_call_timeout: Duration::from_secs(25),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_json_str("{}").unwrap();
        assert_eq!(config.bus.application_name, "bus-bridge");
        assert_eq!(config.bus.method_call_timeout, Duration::from_secs(25));
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_humantime_timeout() {
        let config =
            Config::from_json_str(r#"{"bus": {"method_call_timeout": "1500ms"}}"#).unwrap();
        assert_eq!(config.bus.method_call_timeout, Duration::from_millis(1500));
        assert!(config.bus.allow_remote_messages);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"bus": {{"application_name": "chat"}}, "observability": {{"json_logs": true}}}}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bus.application_name, "chat");
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_malformed_document_is_serialization_error() {
        let err = Config::from_json_str("{not json").unwrap_err();
        assert!(err.to_string().contains("serialization error"));
    }
}
