//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → HeaderProxyConfig (validated, immutable)
//!     → proxy::Settings (header names, timeouts, limits resolved once)
//!
//! On change:
//!     watcher.rs detects change, skips content it already accepted
//!     → loader.rs parses, validation.rs validates
//!     → apply_pending drains the channel into HeaderProxy::reload
//!     → settings swap atomically
//!     → transactions already in flight keep their copied fetch settings
//! ```
//!
//! # Design Decisions
//! - An empty file is a valid config: every field has a default
//! - Validation reports every problem at once, not just the first
//! - Header names are checked here so the hot path never sees a bad one

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BackendConfig, CollectConfig, CorrelationConfig, FetchConfig, HeaderProxyConfig, LogFormat,
    ObservabilityConfig, PoolConfig, ServerConfig,
};
pub use validation::{validate_config, ValidationError};
pub use watcher::{apply_pending, ConfigWatcher};
