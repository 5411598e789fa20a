//!
//! Trellis Monitoring - structured logging setup.
//!
//! One `init` call at process start wires a tracing-subscriber registry:
//! JSON logs for production, pretty logs for development, both behind an
//! `EnvFilter`.

#![forbid(unsafe_code)]

pub mod logging;

pub use logging::init_logging;

/// Monitoring configuration
#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    /// Service name stamped on the init log line
    pub service_name: String,
    /// Default filter when `RUST_LOG` is unset
    pub log_filter: String,
    /// JSON output (production) vs pretty output (development)
    pub enable_json_logging: bool,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "trellis".to_string(),
            log_filter: "info,trellis=debug".to_string(),
            enable_json_logging: false,
        }
    }
}

/// Initialize monitoring for the process
pub fn init(config: MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(&config)
}
