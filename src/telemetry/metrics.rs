//! Prometheus metrics

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Gauge metric types
#[derive(Debug, Clone, Copy)]
pub enum GaugeMetric {
    /// Current equity
    Equity,
    /// Capital not committed to positions
    FreeBalance,
    /// Capital committed to positions
    UsedBalance,
    /// Open position count
    OpenPositions,
    /// Total exposure
    TotalExposure,
    /// Current drawdown percentage
    DrawdownPct,
    /// Daily P&L
    DailyPnl,
}

impl GaugeMetric {
    pub fn name(&self) -> &'static str {
        match self {
            GaugeMetric::Equity => "swing_equity_usd",
            GaugeMetric::FreeBalance => "swing_free_balance_usd",
            GaugeMetric::UsedBalance => "swing_used_balance_usd",
            GaugeMetric::OpenPositions => "swing_open_positions",
            GaugeMetric::TotalExposure => "swing_total_exposure_usd",
            GaugeMetric::DrawdownPct => "swing_drawdown_pct",
            GaugeMetric::DailyPnl => "swing_daily_pnl_usd",
        }
    }
}

/// Counter metric types
#[derive(Debug, Clone, Copy)]
pub enum CounterMetric {
    Cycles,
    HaltedCycles,
    PositionsOpened,
    PositionsClosed,
    Swaps,
    SymbolFailures,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::Cycles => "swing_cycles_total",
            CounterMetric::HaltedCycles => "swing_halted_cycles_total",
            CounterMetric::PositionsOpened => "swing_positions_opened_total",
            CounterMetric::PositionsClosed => "swing_positions_closed_total",
            CounterMetric::Swaps => "swing_swaps_total",
            CounterMetric::SymbolFailures => "swing_symbol_failures_total",
        }
    }
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    ::metrics::gauge!(metric.name()).set(value);
}

/// Bump a counter
pub fn increment(metric: CounterMetric, by: u64) {
    if by > 0 {
        ::metrics::counter!(metric.name()).increment(by);
    }
}

/// Serve `/metrics` on `addr`; a bind failure is logged, not fatal
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(%addr, "Prometheus exporter started"),
        Err(e) => tracing::warn!(%addr, error = %e, "Failed to start Prometheus exporter, continuing without metrics"),
    }
}
