//! Telemetry and logging setup
//!
//! TigerStyle: Explicit telemetry configuration with bounded resource usage.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and an
//! optional stdout `fmt` layer. Metric instruments are recorded through the
//! global OpenTelemetry meter (see [`crate::metrics`]); exporting them is left
//! to the embedding process.

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Default service name
const SERVICE_NAME_DEFAULT: &str = "concerto";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to startup logs
    pub service_name: String,
    /// Whether to output traces to stdout
    pub stdout_enabled: bool,
    /// Log level filter, used when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            stdout_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Disable stdout tracing
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - `CONCERTO_SERVICE_NAME`: Service name (default: "concerto")
    /// - `RUST_LOG`: Log level filter (default: "info")
    pub fn from_env() -> Self {
        let service_name = std::env::var("CONCERTO_SERVICE_NAME")
            .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string());
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        Self {
            service_name,
            stdout_enabled: true,
            log_level,
        }
    }
}

/// Guard returned by [`init_telemetry`]
///
/// Keep it alive for the lifetime of the process.
#[derive(Debug)]
pub struct TelemetryGuard {
    service_name: String,
}

impl TelemetryGuard {
    /// Service name the subscriber was installed for
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Install the global tracing subscriber
///
/// # Errors
/// Fails if the log level does not parse or a global subscriber is already
/// installed.
///
/// # Example
///
/// ```rust,ignore
/// use concerto_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::new("inventory").with_log_level("debug"))?;
/// ```
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            Error::invalid_configuration("telemetry.log_level", e.to_string())
        })?,
    };

    let fmt_layer = if config.stdout_enabled {
        Some(tracing_subscriber::fmt::layer())
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::Internal {
            reason: format!("failed to initialize tracing subscriber: {}", e),
        })?;

    tracing::info!(
        service = %config.service_name,
        log_level = %config.log_level,
        "telemetry initialized"
    );

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}
