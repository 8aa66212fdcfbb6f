//! Directive documents: fetch, tokenize, interpret.
//!
//! # Data Flow
//! ```text
//! Receive phase
//!     → fetch.rs (GET directive backend via transport.rs, shape checks)
//!     → token.rs (bounded tokenizer, tokens stored on the record)
//! every phase
//!     → interpreter.rs (plan: pick this phase's section; apply: set/fold)
//! ```
//!
//! # Design Decisions
//! - The document is fetched and tokenized once per transaction; later
//!   phases re-walk the stored tokens
//! - Failures never abort the host's request; they are recorded on the
//!   transaction and surfaced through the error accessor

pub mod fetch;
pub mod interpreter;
pub mod token;
pub mod transport;

pub use fetch::{fetch, FetchError, FetchLimits, DEFAULT_MAX_BODY_BYTES};
pub use interpreter::{apply, plan, CollectRule, InterpretError, Plan};
pub use token::{tokenize, Token, TokenKind, TokenizeError, DEFAULT_MAX_TOKENS};
pub use transport::{FetchRequest, FetchResponse, ReqwestTransport, Transport, TransportError};
