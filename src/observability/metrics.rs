//! Metrics collection.
//!
//! Emitted through the `metrics` facade. The library never installs a
//! recorder on its own; the binaries call [`install_exporter`] when
//! metrics are enabled, and without a recorder every call is a no-op.
//!
//! # Metrics
//! - `header_proxy_fetch_total` (counter): directive fetches by outcome
//! - `header_proxy_fetch_duration_seconds` (histogram): fetch latency
//! - `header_proxy_pool_records` (gauge): records allocated by the pool
//! - `header_proxy_pool_exhausted_total` (counter): acquires refused at capacity
//! - `header_proxy_gc_reclaimed_total` (counter): stale records reclaimed
//! - `header_proxy_directives_applied_total` (counter): directives by phase
//! - `header_proxy_lost_headers_total` (counter): folds dropped for lack of space

use std::net::SocketAddr;
use std::time::Instant;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use thiserror::Error;

use crate::config::ObservabilityConfig;
use crate::phase::Phase;

pub fn record_fetch(outcome: &'static str, started: Instant) {
    ::metrics::counter!("header_proxy_fetch_total", "outcome" => outcome).increment(1);
    ::metrics::histogram!("header_proxy_fetch_duration_seconds").record(started.elapsed().as_secs_f64());
}

pub fn record_pool_size(records: usize) {
    ::metrics::gauge!("header_proxy_pool_records").set(records as f64);
}

pub fn record_pool_exhausted() {
    ::metrics::counter!("header_proxy_pool_exhausted_total").increment(1);
}

pub fn record_gc(reclaimed: usize) {
    if reclaimed > 0 {
        ::metrics::counter!("header_proxy_gc_reclaimed_total").increment(reclaimed as u64);
    }
}

pub fn record_directives(phase: Phase, applied: usize) {
    ::metrics::counter!("header_proxy_directives_applied_total", "phase" => phase.directive_key())
        .increment(applied as u64);
}

pub fn record_lost_header(name: &str) {
    ::metrics::counter!("header_proxy_lost_headers_total", "header" => name.to_string()).increment(1);
}

/// Errors installing the Prometheus exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    #[error("invalid metrics address {0:?}")]
    Address(String),

    #[error("failed to install metrics exporter: {0}")]
    Build(#[from] BuildError),
}

/// Serve Prometheus metrics on `metrics_address` when enabled. Returns
/// whether an exporter was installed.
pub fn install_exporter(config: &ObservabilityConfig) -> Result<bool, ExporterError> {
    if !config.metrics_enabled {
        return Ok(false);
    }
    let addr: SocketAddr = config
        .metrics_address
        .parse()
        .map_err(|_| ExporterError::Address(config.metrics_address.clone()))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exporter_disabled_by_default() {
        assert!(!install_exporter(&ObservabilityConfig::default()).unwrap());
    }

    #[test]
    fn test_exporter_rejects_bad_address() {
        let config = ObservabilityConfig {
            metrics_enabled: true,
            metrics_address: "not-an-address".to_string(),
            ..ObservabilityConfig::default()
        };
        assert!(matches!(install_exporter(&config), Err(ExporterError::Address(_))));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_fetch("ok", Instant::now());
        record_pool_size(3);
        record_directives(Phase::Deliver, 2);
        record_lost_header("Cookie");
    }
}
