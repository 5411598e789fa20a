//! Structured logging module using tracing.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::MonitoringConfig;

/// Initialize structured logging
pub fn init_logging(config: &MonitoringConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let registry = tracing_subscriber::registry().with(env_filter);

    if config.enable_json_logging {
        // JSON logs for production log aggregation
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_file(true)
            .with_line_number(true);
        registry
            .with(json_layer)
            .try_init()
            .context("failed to set global default subscriber")?;
    } else {
        // Pretty logs for development
        let fmt_layer = fmt::layer().with_target(true);
        registry
            .with(fmt_layer)
            .try_init()
            .context("failed to set global default subscriber")?;
    }

    info!(
        service_name = %config.service_name,
        log_format = if config.enable_json_logging { "json" } else { "pretty" },
        "logging initialized"
    );

    Ok(())
}

/// Trait to add log context to results
pub trait LogExt<T, E> {
    /// Log error with additional context before returning
    fn log_err(self, message: &str) -> Result<T, E>;
}

impl<T, E: std::fmt::Display> LogExt<T, E> for Result<T, E> {
    fn log_err(self, message: &str) -> Result<T, E> {
        if let Err(ref e) = self {
            tracing::error!("{}: {}", message, e);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent_enough() {
        // First call may or may not win the global slot depending on test
        // order; the second must not panic either way.
        let _ = init_logging(&MonitoringConfig::default());
        let _ = init_logging(&MonitoringConfig::default());
    }

    #[test]
    fn test_log_err_passes_value_through() {
        let ok: Result<i32, String> = Ok(7);
        assert_eq!(ok.log_err("ctx").unwrap(), 7);

        let err: Result<i32, String> = Err("boom".to_string());
        assert!(err.log_err("ctx").is_err());
    }
}
