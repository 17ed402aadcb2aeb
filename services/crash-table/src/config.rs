use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use liftoff_execution::{FairnessConfig, PhaseConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::Level;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 9124;
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_BROADCAST_BUFFER: usize = 1_024;

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_broadcast_buffer() -> usize {
    DEFAULT_BROADCAST_BUFFER
}

/// Service configuration, read from YAML.
#[derive(Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,

    /// SQLite file for round history. History is kept in memory only when unset.
    #[serde(default)]
    pub history_path: Option<PathBuf>,
    /// Bearer token required by the admin routes.
    #[serde(default)]
    pub admin_token: Option<String>,
    /// Capacity of the round snapshot feed.
    #[serde(default = "default_broadcast_buffer")]
    pub broadcast_buffer: usize,

    #[serde(default)]
    pub phases: PhaseConfig,
    #[serde(default)]
    pub fairness: FairnessConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            json_logs: false,
            history_path: None,
            admin_token: None,
            broadcast_buffer: default_broadcast_buffer(),
            phases: PhaseConfig::default(),
            fairness: FairnessConfig::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error("invalid listen address: {value}")]
    InvalidAddress { value: String },
    #[error("{field} must be > 0 (got {value})")]
    InvalidNonZero { field: &'static str, value: usize },
    #[error("admin_token must not be empty when set")]
    EmptyAdminToken,
    #[error("invalid phases: {0}")]
    InvalidPhases(&'static str),
    #[error("invalid fairness: {0}")]
    InvalidFairness(&'static str),
}

pub struct ValidatedConfig {
    pub addr: SocketAddr,
    pub log_level: Level,
    pub json_logs: bool,
    pub history_path: Option<PathBuf>,
    pub admin_token: Option<String>,
    pub broadcast_buffer: usize,
    pub phases: PhaseConfig,
    pub fairness: FairnessConfig,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let log_level = Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
            value: self.log_level.clone(),
        })?;
        let raw_addr = format!("{}:{}", self.host, self.port);
        let addr = raw_addr
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidAddress { value: raw_addr })?;
        if self.broadcast_buffer == 0 {
            return Err(ConfigError::InvalidNonZero {
                field: "broadcast_buffer",
                value: 0,
            });
        }
        let admin_token = match self.admin_token {
            Some(token) if token.trim().is_empty() => return Err(ConfigError::EmptyAdminToken),
            Some(token) => Some(token.trim().to_string()),
            None => None,
        };
        self.phases.validate().map_err(ConfigError::InvalidPhases)?;
        self.fairness.validate().map_err(ConfigError::InvalidFairness)?;

        Ok(ValidatedConfig {
            addr,
            log_level,
            json_logs: self.json_logs,
            history_path: self.history_path,
            admin_token,
            broadcast_buffer: self.broadcast_buffer,
            phases: self.phases,
            fairness: self.fairness,
        })
    }
}

impl fmt::Debug for ValidatedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedConfig")
            .field("addr", &self.addr)
            .field("log_level", &self.log_level)
            .field("json_logs", &self.json_logs)
            .field("history_path", &self.history_path)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .field("broadcast_buffer", &self.broadcast_buffer)
            .field("phases", &self.phases)
            .field("fairness", &self.fairness)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use liftoff_execution::FairnessAlgorithm;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_yaml("{}").expect("empty config parses");
        let validated = config.validate().expect("defaults are valid");
        assert_eq!(validated.addr, "0.0.0.0:9124".parse().unwrap());
        assert_eq!(validated.log_level, Level::INFO);
        assert_eq!(validated.phases, PhaseConfig::default());
        assert_eq!(validated.fairness, FairnessConfig::default());
        assert!(validated.history_path.is_none());
    }

    #[test]
    fn partial_sections_fill_in_defaults() {
        let config = Config::from_yaml(
            r#"
port: 7000
log_level: debug
history_path: /var/lib/liftoff/history.db
phases:
  waiting_ms: 3000
fairness:
  algorithm: inverse
  soft_cap: 5.0
"#,
        )
        .expect("config parses");
        let validated = config.validate().expect("config is valid");
        assert_eq!(validated.addr.port(), 7000);
        assert_eq!(validated.log_level, Level::DEBUG);
        assert_eq!(validated.phases.waiting_ms, 3_000);
        assert_eq!(validated.phases.tick_ms, PhaseConfig::default().tick_ms);
        assert_eq!(validated.fairness.algorithm, FairnessAlgorithm::Inverse);
        assert_eq!(validated.fairness.soft_cap, 5.0);
        assert_eq!(validated.fairness.max_crash_point, 50.0);
        assert_eq!(
            validated.history_path,
            Some(PathBuf::from("/var/lib/liftoff/history.db"))
        );
    }

    #[test]
    fn rejects_invalid_values() {
        let err = Config::from_yaml("log_level: loud").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel { .. }));

        let err = Config::from_yaml("host: not an ip").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));

        let err = Config::from_yaml("broadcast_buffer: 0").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNonZero { field: "broadcast_buffer", .. }));

        let err = Config::from_yaml("phases:\n  tick_ms: 0").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPhases(_)));

        let err = Config::from_yaml("fairness:\n  max_crash_point: 2.0")
            .unwrap()
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFairness(_)));

        let err = Config::from_yaml("admin_token: '  '").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyAdminToken));
    }

    #[test]
    fn validated_debug_does_not_leak_admin_token() {
        let config = Config {
            admin_token: Some("hunter2".to_string()),
            ..Config::default()
        };
        let validated = config.validate().unwrap();
        let rendered = format!("{validated:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
