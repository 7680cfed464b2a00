use crate::error::{AppError, Result};
use crate::messaging::BrokerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use validator::Validate;

/// Legacy environment variables honoured by earlier worker deployments,
/// mapped onto their configuration keys.
const LEGACY_ENV_OVERRIDES: &[(&str, &str)] = &[
    ("RABBITMQ_URL", "broker.url"),
    ("CANDIDATE_INVITATION_QUEUE", "broker.queue"),
    ("CANDIDATE_INVITATION_EXCHANGE", "broker.exchange"),
    ("CANDIDATE_INVITATION_ROUTING_KEY", "broker.routing_key"),
];

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Broker configuration
    #[serde(default)]
    pub broker: BrokerConfig,

    /// State backend configuration
    #[serde(default)]
    pub state: StateConfig,

    /// Processing configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment. The optional file is
    /// read from `path`, falling back to `CONFIG_PATH`.
    pub fn load_from(path: Option<&str>) -> std::result::Result<Self, config::ConfigError> {
        let config_path = path
            .map(str::to_string)
            .or_else(|| std::env::var("CONFIG_PATH").ok())
            .unwrap_or_else(|| "config/default.toml".to_string());

        let mut builder = config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: INVITATION_CONSUMER__)
            .add_source(
                config::Environment::with_prefix("INVITATION_CONSUMER")
                    .separator("__")
                    .try_parsing(true),
            );

        for (var, key) in LEGACY_ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        builder.build()?.try_deserialize()
    }

    /// Check startup preconditions. A failure here must stop the process.
    pub fn validate(&self) -> Result<()> {
        self.broker.validate()?;

        if self.broker.backend == crate::messaging::BrokerBackend::Amqp && self.broker.url().is_none() {
            return Err(AppError::Configuration(
                "broker.url (or RABBITMQ_URL) is not set".to_string(),
            ));
        }

        if self.state.backend == StateBackend::Sled && self.state.path.is_none() {
            return Err(AppError::Configuration(
                "Sled backend requires 'state.path' configuration".to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// State backend type
    #[serde(default)]
    pub backend: StateBackend,

    /// Path for embedded database (sled)
    pub path: Option<PathBuf>,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            backend: StateBackend::Sled,
            path: Some(PathBuf::from("./data/invitations")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    Sled,
    InMemory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Deadline for applying one invitation (seconds). Unset disables it.
    #[serde(default = "default_processing_timeout")]
    pub timeout_secs: Option<u64>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_processing_timeout(),
        }
    }
}

impl ProcessingConfig {
    pub fn timeout(&self) -> Option<std::time::Duration> {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map(std::time::Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,

    /// Service name
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Record Prometheus metrics and serve them over HTTP
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Metrics listener host
    #[serde(default = "default_metrics_host")]
    pub metrics_host: String,

    /// Metrics listener port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

impl ObservabilityConfig {
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.metrics_host, self.metrics_port)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            service_name: default_service_name(),
            metrics_enabled: true,
            metrics_host: default_metrics_host(),
            metrics_port: default_metrics_port(),
        }
    }
}

// Default value functions
fn default_processing_timeout() -> Option<u64> {
    Some(30)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_service_name() -> String {
    "candidate-invitation-consumer".to_string()
}

fn default_metrics_host() -> String {
    "0.0.0.0".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::BrokerBackend;

    #[test]
    fn test_default_config_values() {
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_processing_timeout(), Some(30));
        assert!(default_true());
        assert_eq!(default_metrics_port(), 9090);
        assert_eq!(ObservabilityConfig::default().metrics_addr(), "0.0.0.0:9090");
        assert_eq!(StateBackend::default(), StateBackend::Sled);
    }

    #[test]
    fn test_embedded_defaults_parse() {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.broker.queue, "candidate.invitation.queue");
        assert_eq!(config.broker.backend, BrokerBackend::Amqp);
        assert_eq!(config.state.backend, StateBackend::Sled);
        assert_eq!(config.processing.timeout_secs, Some(30));
        assert!(config.broker.url.is_none());
    }

    #[test]
    fn test_missing_broker_url_is_fatal() {
        let config = Config::default();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AppError::Configuration(_)));
    }

    #[test]
    fn test_in_memory_broker_needs_no_url() {
        let mut config = Config::default();
        config.broker.backend = BrokerBackend::InMemory;
        config.state.backend = StateBackend::InMemory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let processing = ProcessingConfig {
            timeout_secs: Some(0),
        };
        assert!(processing.timeout().is_none());
        assert_eq!(
            ProcessingConfig::default().timeout(),
            Some(std::time::Duration::from_secs(30))
        );
    }
}
