//! Configuration management for the pdpd daemon.
//!
//! This module provides the configuration system that supports:
//! - Loading from YAML files
//! - Environment variable overrides (`PDPD__SECTION__KEY`)
//! - Validation of all settings
//! - PDP identity, topic endpoints, controllers, pooling and logging settings

use crate::error::{ConfigError, Result};
use crate::properties::Properties;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use pdpd_core::config::AppConfig;
///
/// let config = AppConfig::from_file("config/pdpd.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// PDP identity and PAP interaction
    #[serde(default)]
    pub pdp: PdpConfig,

    /// Topic endpoint properties (`noop.source.topics`, ...)
    #[serde(default)]
    pub topics: Properties,

    /// Controllers built at start-up, by name
    #[serde(default)]
    pub controllers: BTreeMap<String, Properties>,

    /// Pooling settings (`pooling.<controller>.<key>`)
    #[serde(default)]
    pub pooling: Properties,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, layering `PDPD__`
    /// environment variables over the file.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("PDPD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.pdp.validate()?;

        for name in self.controllers.keys() {
            if name.trim().is_empty() {
                return Err(ConfigError::validation_failed("controller name must not be blank").into());
            }
            if self
                .controllers
                .keys()
                .filter(|other| other.eq_ignore_ascii_case(name))
                .count()
                > 1
            {
                return Err(ConfigError::DuplicateController { name: name.clone() }.into());
            }
        }

        self.logging.parse_level()?;
        Ok(())
    }
}

/// PDP identity and PAP interaction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdpConfig {
    /// PDP instance name; generated when absent
    #[serde(default)]
    pub name: Option<String>,

    /// PDP type reported in status messages
    #[serde(default = "default_pdp_type")]
    pub pdp_type: String,

    /// Initial PDP group
    #[serde(default)]
    pub group: Option<String>,

    /// Initial PDP subgroup
    #[serde(default)]
    pub subgroup: Option<String>,

    /// Status heartbeat period
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    /// Topic carrying PAP requests and PDP status
    #[serde(default = "default_pap_topic")]
    pub pap_topic: String,
}

fn default_pdp_type() -> String {
    "drools".to_string()
}

fn default_status_interval() -> u64 {
    120
}

fn default_pap_topic() -> String {
    "POLICY-PDP-PAP".to_string()
}

impl Default for PdpConfig {
    fn default() -> Self {
        Self {
            name: None,
            pdp_type: default_pdp_type(),
            group: None,
            subgroup: None,
            status_interval_secs: default_status_interval(),
            pap_topic: default_pap_topic(),
        }
    }
}

impl PdpConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pdp_type.trim().is_empty() {
            return Err(ConfigError::invalid_value("pdp.pdp_type", "must not be empty").into());
        }
        if self.status_interval_secs == 0 {
            return Err(
                ConfigError::invalid_value("pdp.status_interval_secs", "must be positive").into(),
            );
        }
        if self.pap_topic.trim().is_empty() {
            return Err(ConfigError::invalid_value("pdp.pap_topic", "must not be empty").into());
        }
        Ok(())
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    /// Configured name, or `<hostname>-<uuid>`.
    pub fn resolve_name(&self) -> String {
        if let Some(name) = self.name.as_ref().filter(|n| !n.trim().is_empty()) {
            return name.clone();
        }
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "drools".to_string());
        format!("{}-{}", host, uuid::Uuid::new_v4())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
pdp:
  name: pdp-test
  group: defaultGroup
  status_interval_secs: 30
topics:
  noop.source.topics: POLICY-PDP-PAP
  noop.sink.topics: POLICY-PDP-PAP
controllers:
  usecases:
    controller.policy.types: onap.policies.controlloop.operational.common.Drools:1.0.0
pooling:
  pooling.usecases.enabled: "true"
  pooling.usecases.topic: POOLING
logging:
  level: debug
  format: json
"#;

    #[test]
    fn test_from_yaml() {
        let config = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.pdp.resolve_name(), "pdp-test");
        assert_eq!(config.pdp.pdp_type, "drools");
        assert_eq!(config.pdp.status_interval(), Duration::from_secs(30));
        assert_eq!(config.topics.get("noop.sink.topics"), Some("POLICY-PDP-PAP"));
        assert!(config.controllers.contains_key("usecases"));
        assert_eq!(config.pooling.get_bool("pooling.usecases.enabled").unwrap(), Some(true));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pdp.pap_topic, "POLICY-PDP-PAP");
        assert_eq!(config.pdp.status_interval_secs, 120);
        assert!(config.validate().is_ok());
        assert!(!config.pdp.resolve_name().is_empty());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = AppConfig::default();
        config.pdp.status_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.controllers.insert("A".into(), Properties::new());
        config.controllers.insert("a".into(), Properties::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_config_builder_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::from_config_builder(file.path()).unwrap();
        assert_eq!(config.pdp.group.as_deref(), Some("defaultGroup"));
    }

    #[test]
    fn test_missing_file() {
        assert!(AppConfig::from_file("/nonexistent/pdpd.yaml").is_err());
    }
}
