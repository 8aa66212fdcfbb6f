//! Drives one transaction through the phases the way a caching proxy would.
//!
//! Used by the CLI and the integration tests. The host behaviour modelled
//! here is the minimum the correlation protocol relies on: the backend
//! request starts as a copy of the client request, and the client response
//! starts as a copy of the backend response.

use crate::directive::Transport;
use crate::headers::HeaderList;
use crate::phase::{Phase, PhaseContext};
use crate::proxy::HeaderProxy;

/// The client side of a simulated transaction.
#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub method: String,
    pub url: String,
    pub proto: String,
    pub headers: Vec<String>,
}

impl ClientRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            proto: "HTTP/1.1".to_string(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, line: impl Into<String>) -> Self {
        self.headers.push(line.into());
        self
    }
}

/// Header collection a phase mutated, as it stood after the phase.
#[derive(Debug, Clone)]
pub struct PhaseTrace {
    pub phase: Phase,
    pub headers: HeaderList,
    /// Diagnostic for the transaction while it was still live in this phase.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransactionTrace {
    pub phases: Vec<PhaseTrace>,
}

impl TransactionTrace {
    pub fn phase(&self, phase: Phase) -> Option<&PhaseTrace> {
        self.phases.iter().find(|t| t.phase == phase)
    }
}

/// Run Receive → BackendFetch → BackendResponse → Deliver. `origin` is the
/// header set the origin server answers with.
pub fn run_transaction<T: Transport>(
    proxy: &HeaderProxy<T>,
    request: &ClientRequest,
    origin: &[String],
) -> TransactionTrace {
    run_transaction_with(proxy, request, origin, |_, _| {})
}

/// Like [`run_transaction`], with `receive` run on the Receive context
/// before `call`, where per-transaction settings such as
/// [`HeaderProxy::set_backend`] are allowed.
pub fn run_transaction_with<T: Transport>(
    proxy: &HeaderProxy<T>,
    request: &ClientRequest,
    origin: &[String],
    receive: impl FnOnce(&HeaderProxy<T>, &mut PhaseContext),
) -> TransactionTrace {
    let mut trace = TransactionTrace::default();

    let mut ctx = PhaseContext::new(Phase::Receive);
    ctx.method = request.method.clone();
    ctx.url = request.url.clone();
    ctx.proto = request.proto.clone();
    ctx.req = HeaderList::from_lines(request.headers.iter().cloned());

    receive(proxy, &mut ctx);
    proxy.call(&mut ctx);
    trace.phases.push(PhaseTrace {
        phase: Phase::Receive,
        headers: ctx.req.clone(),
        error: proxy.error(&ctx),
    });

    for phase in [Phase::BackendFetch, Phase::BackendResponse, Phase::Deliver] {
        ctx.enter(phase);
        match phase {
            Phase::BackendFetch => ctx.bereq = ctx.req.clone(),
            Phase::BackendResponse => ctx.beresp = HeaderList::from_lines(origin.iter().cloned()),
            _ => ctx.resp = ctx.beresp.clone(),
        }

        let error = proxy.error(&ctx);
        proxy.process(&mut ctx);
        let headers = match phase {
            Phase::BackendFetch => ctx.bereq.clone(),
            Phase::BackendResponse => ctx.beresp.clone(),
            _ => ctx.resp.clone(),
        };
        trace.phases.push(PhaseTrace { phase, headers, error });
    }

    tracing::debug!(phases = trace.phases.len(), "Simulated transaction complete");
    trace
}
