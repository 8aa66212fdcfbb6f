//! Reference directive backend over HTTP.
//!
//! # Data Flow
//! ```text
//! directive fetch (X-Forwarded-Method, X-Forwarded-Url, client headers)
//!     → server.rs (Axum router, request ID, trace, timeout)
//!     → directives_for (geo + A/B decisions from cookies and headers)
//!     → JSON directive document {"vcl_recv": [...], "vcl_deliver": [...]}
//! ```

pub mod server;

pub use server::{directives_for, DirectiveDocument, DirectiveServer};
