//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! fetch, pool, interpreter
//!     → logging.rs (structured tracing events: id, phase, error)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//! ```
//!
//! # Design Decisions
//! - The library only emits; hosts decide where logs and metrics go
//! - Transaction id and phase are attached as fields, never formatted
//!   into the message

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
