//! Tracing and metrics bootstrap.

use crate::config::{ConfigError, MetricsConfig};
use booking_ledger_runtime::metrics::{MetricsError, MetricsServer};
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Errors from telemetry setup
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The metrics address is malformed
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The exporter could not be built
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Install the global `tracing` subscriber.
///
/// Filtering follows `RUST_LOG`, defaulting to `info`. Calling this twice
/// leaves the first subscriber in place.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Start the Prometheus exporter described by `config`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns [`TelemetryError`] if the address is invalid or the exporter
/// cannot be built.
pub fn start_metrics(config: &MetricsConfig) -> Result<MetricsServer, TelemetryError> {
    let mut server = MetricsServer::new(config.addr()?);
    server.start()?;
    Ok(server)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn local(port: u16) -> MetricsConfig {
        MetricsConfig {
            host: "127.0.0.1".to_string(),
            port,
        }
    }

    #[test]
    fn init_tracing_can_be_called_repeatedly() {
        init_tracing();
        init_tracing();
        tracing::info!("still logging");
    }

    #[tokio::test]
    async fn malformed_metrics_host_is_a_config_error() {
        let config = MetricsConfig {
            host: "not a host".to_string(),
            port: 9090,
        };
        let result = start_metrics(&config);
        assert!(matches!(
            result,
            Err(TelemetryError::Config(ConfigError::Invalid {
                name: "METRICS_HOST",
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn second_exporter_keeps_the_first_recorder() {
        let first = start_metrics(&local(0)).unwrap();
        let second = start_metrics(&local(0)).unwrap();

        assert!(first.handle().is_some());
        assert!(second.handle().is_none());
    }
}
