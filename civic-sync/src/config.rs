//! Configuration loading for the sync client.
//!
//! All fields are required unless explicitly marked optional. No defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub ws_endpoint: String,
    pub auth: AuthConfig,
    pub request_timeout_ms: u64,
    pub reconciliation_timeout_ms: u64,
    pub channel_capacity: usize,
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub api_key: Option<String>,
    pub jwt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconnectConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or CIVIC_SYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl SyncConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if self.ws_endpoint.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "ws_endpoint",
                reason: "must not be empty".to_string(),
            });
        }
        if self.auth.api_key.is_none() && self.auth.jwt.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "auth",
                reason: "api_key or jwt must be provided".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.reconciliation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconciliation_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "channel_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        self.reconnect.validate()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconciliation_timeout(&self) -> Duration {
        Duration::from_millis(self.reconciliation_timeout_ms)
    }
}

impl ReconnectConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.initial_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.max_ms < self.initial_ms {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.max_ms",
                reason: "must be >= initial_ms".to_string(),
            });
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "reconnect.multiplier",
                reason: "must be >= 1.0".to_string(),
            });
        }
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("CIVIC_SYNC_CONFIG").ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
api_base_url = "https://reports.example.org"
ws_endpoint = "wss://reports.example.org/ws"
request_timeout_ms = 10000
reconciliation_timeout_ms = 5000
channel_capacity = 256

[auth]
api_key = "secret"

[reconnect]
initial_ms = 500
max_ms = 30000
multiplier = 2.0
jitter_ms = 250
"#;

    #[test]
    fn test_parse_valid_config() {
        let config = SyncConfig::from_toml(VALID).unwrap();
        assert_eq!(config.channel_capacity, 256);
        assert_eq!(config.reconciliation_timeout(), Duration::from_secs(5));
        assert_eq!(config.auth.api_key.as_deref(), Some("secret"));
        assert!(config.auth.jwt.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let contents = format!("{}\nunexpected = true\n", VALID);
        assert!(matches!(
            SyncConfig::from_toml(&contents),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_auth_rejected() {
        let contents = VALID.replace("api_key = \"secret\"", "");
        match SyncConfig::from_toml(&contents) {
            Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, "auth"),
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_reconciliation_timeout_rejected() {
        let contents = VALID.replace(
            "reconciliation_timeout_ms = 5000",
            "reconciliation_timeout_ms = 0",
        );
        match SyncConfig::from_toml(&contents) {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "reconciliation_timeout_ms")
            }
            other => panic!("expected timeout error, got {:?}", other),
        }
    }

    #[test]
    fn test_reconnect_bounds() {
        let reconnect = ReconnectConfig {
            initial_ms: 1000,
            max_ms: 500,
            multiplier: 2.0,
            jitter_ms: 0,
        };
        assert!(reconnect.validate().is_err());
        let reconnect = ReconnectConfig {
            max_ms: 1000,
            multiplier: 0.5,
            ..reconnect
        };
        assert!(reconnect.validate().is_err());
    }
}
