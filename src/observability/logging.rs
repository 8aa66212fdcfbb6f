//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, pretty format for development
//! - `RUST_LOG` overrides the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::schema::{LogFormat, ObservabilityConfig};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);

    match config.log_format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry.with(tracing_subscriber::fmt::layer().compact()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    }
}

/// `header_proxy=<level>,tower_http=<level>`, falling back to info for an
/// unknown level.
fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("header_proxy={level},tower_http={level}"))
        .unwrap_or_else(|_| EnvFilter::new("header_proxy=info,tower_http=info"))
}
