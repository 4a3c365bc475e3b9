//! Telemetry module
//!
//! Logging and metrics

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{increment, init_metrics, set_gauge, CounterMetric, GaugeMetric};

use crate::config::TelemetryConfig;
use std::net::{Ipv4Addr, SocketAddr};

/// Initialize all telemetry subsystems
///
/// Must run inside a tokio runtime when a metrics port is configured.
pub fn init_telemetry(config: &TelemetryConfig) -> anyhow::Result<()> {
    init_logging(&config.log_level, config.log_format)?;

    if let Some(port) = config.metrics_port {
        init_metrics(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)));
    }

    Ok(())
}
