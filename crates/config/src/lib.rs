//! Configuration management for askdoc
//!
//! Supports loading configuration from:
//! - `config/default` and `config/<env>` files (TOML, YAML or JSON)
//! - Environment variables (`ASKDOC__` prefix, `__` separator)
//!
//! Also owns tracing subscriber initialisation, since the log level and
//! format are configuration.

pub mod agent;
pub mod constants;
pub mod settings;
pub mod telemetry;

pub use agent::{MemoryConfig, WorkflowConfig};
pub use settings::{
    load_settings, load_settings_from, FusionMode, LlmConfig, LlmProvider, ObservabilityConfig,
    RagConfig, RerankerKind, Settings,
};
pub use telemetry::{init_tracing, try_init_tracing};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Tracing setup failed: {0}")]
    Tracing(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for askdoc_core::Error {
    fn from(err: ConfigError) -> Self {
        askdoc_core::Error::Config(err.to_string())
    }
}
