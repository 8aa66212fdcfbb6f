//! Transaction phases and the per-invocation context a host hands in.

use std::fmt;

use crate::headers::{HeaderList, HeaderTarget, Workspace};
use crate::pool::TransactionId;

/// A point in the transaction lifecycle where the host calls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Receive,
    BackendFetch,
    BackendResponse,
    Deliver,
    Pipe,
    Synth,
    BackendError,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Receive,
        Phase::BackendFetch,
        Phase::BackendResponse,
        Phase::Deliver,
        Phase::Pipe,
        Phase::Synth,
        Phase::BackendError,
    ];

    /// The key naming this phase in a directive document.
    pub fn directive_key(self) -> &'static str {
        match self {
            Phase::Receive => "vcl_recv",
            Phase::BackendFetch => "vcl_backend_fetch",
            Phase::BackendResponse => "vcl_backend_response",
            Phase::Deliver => "vcl_deliver",
            Phase::Pipe => "vcl_pipe",
            Phase::Synth => "vcl_synth",
            Phase::BackendError => "vcl_backend_error",
        }
    }

    /// Exact match of a directive document key.
    pub fn from_directive_key(key: &str) -> Option<Phase> {
        Phase::ALL.into_iter().find(|p| p.directive_key() == key)
    }

    /// The header collection directives for this phase mutate. Terminal
    /// error paths have none.
    pub fn target(self) -> Option<HeaderTarget> {
        match self {
            Phase::Receive => Some(HeaderTarget::Request),
            Phase::BackendFetch => Some(HeaderTarget::BackendRequest),
            Phase::BackendResponse => Some(HeaderTarget::BackendResponse),
            Phase::Deliver => Some(HeaderTarget::Response),
            Phase::Pipe | Phase::Synth | Phase::BackendError => None,
        }
    }

    /// Where the correlation header is read back in this phase.
    pub fn correlation_source(self) -> HeaderTarget {
        match self {
            Phase::Receive | Phase::Deliver | Phase::Pipe | Phase::Synth => HeaderTarget::Request,
            Phase::BackendFetch | Phase::BackendResponse | Phase::BackendError => {
                HeaderTarget::BackendRequest
            }
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.directive_key())
    }
}

/// Set of phases a transaction has been seen in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSet(u8);

impl PhaseSet {
    pub const EMPTY: PhaseSet = PhaseSet(0);

    pub fn insert(&mut self, phase: Phase) {
        self.0 |= phase.bit();
    }

    pub fn contains(self, phase: Phase) -> bool {
        self.0 & phase.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl FromIterator<Phase> for PhaseSet {
    fn from_iter<I: IntoIterator<Item = Phase>>(iter: I) -> Self {
        let mut set = PhaseSet::EMPTY;
        for phase in iter {
            set.insert(phase);
        }
        set
    }
}

/// Everything one phase invocation exposes to the core.
///
/// The host fills in the collections that exist in the current phase and
/// leaves the others empty.
#[derive(Debug, Clone)]
pub struct PhaseContext {
    pub phase: Phase,
    /// Client request line.
    pub method: String,
    pub url: String,
    pub proto: String,
    /// How many times the host restarted this transaction.
    pub restarts: u32,
    /// ESI include depth; zero for the top-level response.
    pub esi_level: u32,
    pub req: HeaderList,
    pub bereq: HeaderList,
    pub beresp: HeaderList,
    pub resp: HeaderList,
    pub workspace: Workspace,
    /// Transaction the proxy assigned to this request during Receive.
    /// Hosts keep it with the request, like any per-request task state.
    pub transaction: Option<TransactionId>,
}

impl PhaseContext {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            method: "GET".to_string(),
            url: "/".to_string(),
            proto: "HTTP/1.1".to_string(),
            restarts: 0,
            esi_level: 0,
            req: HeaderList::new(),
            bereq: HeaderList::new(),
            beresp: HeaderList::new(),
            resp: HeaderList::new(),
            workspace: Workspace::default(),
            transaction: None,
        }
    }

    pub fn headers(&self, target: HeaderTarget) -> &HeaderList {
        match target {
            HeaderTarget::Request => &self.req,
            HeaderTarget::BackendRequest => &self.bereq,
            HeaderTarget::BackendResponse => &self.beresp,
            HeaderTarget::Response => &self.resp,
        }
    }

    /// A header collection together with the workspace, borrowed apart.
    pub fn headers_mut(&mut self, target: HeaderTarget) -> (&mut HeaderList, &mut Workspace) {
        let headers = match target {
            HeaderTarget::Request => &mut self.req,
            HeaderTarget::BackendRequest => &mut self.bereq,
            HeaderTarget::BackendResponse => &mut self.beresp,
            HeaderTarget::Response => &mut self.resp,
        };
        (headers, &mut self.workspace)
    }

    /// Move to the next phase, releasing the workspace as a new task would.
    pub fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.workspace.reset();
    }
}
