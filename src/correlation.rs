//! Cross-phase correlation.
//!
//! The first phase writes the transaction id into a request header. The host
//! copies request headers into the backend request, so every later phase can
//! read the id back from whichever collection it sees and rejoin the pooled
//! record without fetching again.
//!
//! # Release rule
//! A background fetch may finish its backend-response phase before or after
//! the client-facing deliver phase. The record is released when the *second*
//! of the two is seen; releasing on the first would leave the other path with
//! nothing to resume. Error paths (pipe, synth, backend error) release at
//! once.

use crate::headers::{HeaderList, HeaderName};
use crate::phase::{Phase, PhaseContext, PhaseSet};
use crate::pool::TransactionId;

/// Default correlation header.
pub const DEFAULT_CORRELATION_HEADER: &str = "X-Header-Proxy-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Another phase still needs the record.
    Retain,
    /// The transaction is over; the record may be reused.
    Release,
}

/// Whether a record may be released after `phase`, given every phase seen so
/// far (including `phase`).
pub fn retention(visited: PhaseSet, phase: Phase) -> Retention {
    match phase {
        Phase::BackendResponse | Phase::Deliver => {
            if visited.contains(Phase::BackendResponse) && visited.contains(Phase::Deliver) {
                Retention::Release
            } else {
                Retention::Retain
            }
        }
        Phase::Pipe | Phase::Synth | Phase::BackendError => Retention::Release,
        Phase::Receive | Phase::BackendFetch => Retention::Retain,
    }
}

/// Write the id into `headers`, replacing any earlier value.
pub fn inject(headers: &mut HeaderList, name: &HeaderName, id: TransactionId) {
    headers.replace(name, format!("{}: {}", name, id));
}

/// Parse the id back out. Missing, non-numeric and non-positive values all
/// mean "no transaction".
pub fn extract(headers: &HeaderList, name: &HeaderName) -> Option<TransactionId> {
    let raw = headers.get(name)?.trim();
    match raw.parse::<u64>() {
        Ok(0) | Err(_) => None,
        Ok(id) => Some(TransactionId(id)),
    }
}

/// The id visible to the current phase.
pub fn extract_for_phase(ctx: &PhaseContext, name: &HeaderName) -> Option<TransactionId> {
    extract(ctx.headers(ctx.phase.correlation_source()), name)
}
