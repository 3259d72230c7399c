//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::{ConfigError, ObservabilityConfig};

fn build_filter(config: &ObservabilityConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("askdoc={}", config.log_level).into())
}

/// Install the global subscriber, failing if one is already set
pub fn try_init_tracing(config: &ObservabilityConfig) -> Result<(), ConfigError> {
    let fmt_layer = if config.log_json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(build_filter(config))
        .with(fmt_layer)
        .try_init()
        .map_err(|e| ConfigError::Tracing(e.to_string()))
}

/// Install the global subscriber; a second call is a no-op
pub fn init_tracing(config: &ObservabilityConfig) {
    if let Err(e) = try_init_tracing(config) {
        tracing::debug!(error = %e, "tracing already initialised");
    }
}
