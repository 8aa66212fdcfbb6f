//! Header Proxy Library
//!
//! Fetches a JSON directive document once per transaction and applies its
//! header directives in every phase of that transaction, rejoining the same
//! pooled state across phases through a correlation header.

pub mod config;
pub mod correlation;
pub mod directive;
pub mod headers;
pub mod http;
pub mod observability;
pub mod phase;
pub mod pool;
pub mod proxy;
pub mod simulate;

pub use config::schema::HeaderProxyConfig;
pub use http::DirectiveServer;
pub use phase::{Phase, PhaseContext};
pub use proxy::HeaderProxy;
