//! Per-transaction state.

use std::fmt;
use std::time::Duration;

use crate::directive::token::Token;
use crate::phase::{Phase, PhaseSet};

/// Correlation id of a busy transaction. Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<TransactionId> for u64 {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where the directive document is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchTarget {
    /// Absolute URL; the path setting is ignored.
    Url(String),
    /// Named backend, `http://{address}{path}`.
    Backend { name: String, address: String },
}

/// Fetch parameters, copied into the record so per-transaction overrides
/// never leak into other transactions.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchSettings {
    pub target: Option<FetchTarget>,
    pub path: String,
    /// Host override; the client's Host moves to `X-Forwarded-Host`.
    pub host: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            target: None,
            path: "/".to_string(),
            host: None,
            connect_timeout: None,
            timeout: None,
        }
    }
}

/// State shared by every phase of one transaction.
#[derive(Debug, Default)]
pub struct TransactionRecord {
    id: Option<TransactionId>,
    visited: PhaseSet,
    restarts: u32,
    fetched: bool,
    body: String,
    tokens: Vec<Token>,
    error: Option<String>,
    fetch: Option<FetchSettings>,
}

impl TransactionRecord {
    pub fn id(&self) -> Option<TransactionId> {
        self.id
    }

    pub(crate) fn assign(&mut self, id: TransactionId) {
        self.reset();
        self.id = Some(id);
    }

    /// Back to idle defaults. The body buffer is dropped, not kept.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }

    /// Forget the fetch so a restarted transaction fetches again.
    pub fn restart(&mut self, restarts: u32) {
        self.restarts = restarts;
        self.visited.clear();
        self.fetched = false;
        self.body = String::new();
        self.tokens.clear();
        self.error = None;
    }

    pub fn restarts(&self) -> u32 {
        self.restarts
    }

    pub fn visit(&mut self, phase: Phase) {
        self.visited.insert(phase);
    }

    pub fn visited(&self) -> PhaseSet {
        self.visited
    }

    pub fn is_fetched(&self) -> bool {
        self.fetched
    }

    pub(crate) fn mark_fetched(&mut self) {
        self.fetched = true;
    }

    /// Keep a parsed document for later phases.
    pub(crate) fn store_document(&mut self, body: String, tokens: Vec<Token>) {
        self.body = body;
        self.tokens = tokens;
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    /// Fetch settings, initialised from `defaults` on first use.
    pub fn fetch_settings_mut(&mut self, defaults: impl FnOnce() -> FetchSettings) -> &mut FetchSettings {
        self.fetch.get_or_insert_with(defaults)
    }

    pub fn fetch_settings(&self) -> Option<&FetchSettings> {
        self.fetch.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_keeps_id_and_settings() {
        let mut record = TransactionRecord::default();
        record.assign(TransactionId(7));
        record.visit(Phase::Receive);
        record.mark_fetched();
        record.set_error("boom");
        record.fetch_settings_mut(FetchSettings::default).path = "/d".into();

        record.restart(1);
        assert_eq!(record.id(), Some(TransactionId(7)));
        assert_eq!(record.restarts(), 1);
        assert!(!record.is_fetched());
        assert!(record.error().is_none());
        assert!(record.visited().is_empty());
        assert_eq!(record.fetch_settings().unwrap().path, "/d");
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut record = TransactionRecord::default();
        record.assign(TransactionId(3));
        record.store_document("{}".into(), Vec::new());
        record.set_error("x");
        record.reset();
        assert_eq!(record.id(), None);
        assert!(record.error().is_none());
        assert!(record.body().is_empty());
        assert!(record.fetch_settings().is_none());
    }
}
