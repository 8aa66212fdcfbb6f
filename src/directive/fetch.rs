//! One-shot retrieval of a transaction's directive document.

use std::time::Instant;

use thiserror::Error;
use url::Url;

use crate::directive::token::{tokenize, Token, TokenizeError};
use crate::directive::transport::{FetchRequest, Transport, TransportError};
use crate::headers::name::{H_ACCEPT_ENCODING, H_CONTENT_LENGTH, H_HOST, H_VIA};
use crate::observability::metrics;
use crate::phase::PhaseContext;
use crate::pool::{FetchSettings, FetchTarget, TransactionRecord};

/// Default body ceiling.
pub const DEFAULT_MAX_BODY_BYTES: usize = 0x1FFFF;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("no backends available")]
    NoTarget,

    #[error("invalid directive url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("fetch err: {0}")]
    Transport(#[from] TransportError),

    #[error("parse: no body")]
    EmptyBody,

    #[error("parse: body too big ({0})")]
    TooLarge(usize),

    #[error("parse: body is not utf-8")]
    NotUtf8,

    #[error("parse: bad delimiters")]
    BadDelimiters,

    #[error("parse: failed to parse json: {0}")]
    Parse(#[from] TokenizeError),
}

impl FetchError {
    fn outcome(&self) -> &'static str {
        match self {
            FetchError::NoTarget | FetchError::InvalidUrl { .. } => "config",
            FetchError::Transport(_) => "transport",
            FetchError::EmptyBody | FetchError::TooLarge(_) | FetchError::NotUtf8 => "shape",
            FetchError::BadDelimiters => "shape",
            FetchError::Parse(_) => "parse",
        }
    }
}

/// Document limits applied to every fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchLimits {
    pub max_body_bytes: usize,
    pub max_tokens: usize,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_tokens: crate::directive::token::DEFAULT_MAX_TOKENS,
        }
    }
}

/// Fetch and tokenize the directive document for `record`, at most once.
///
/// A non-200 status is noted on the record but the body is still used.
/// Every other failure is recorded and returned; the record keeps no
/// document in that case.
pub fn fetch<T: Transport + ?Sized>(
    record: &mut TransactionRecord,
    ctx: &PhaseContext,
    defaults: &FetchSettings,
    limits: FetchLimits,
    transport: &T,
) -> Result<(), FetchError> {
    if record.is_fetched() {
        return Ok(());
    }
    record.mark_fetched();

    let started = Instant::now();
    let settings = record.fetch_settings().unwrap_or(defaults).clone();
    let result = fetch_document(record, ctx, &settings, limits, transport);

    match &result {
        Ok(()) => metrics::record_fetch("ok", started),
        Err(e) => {
            tracing::warn!(id = ?record.id(), error = %e, "Directive fetch failed");
            record.set_error(e.to_string());
            metrics::record_fetch(e.outcome(), started);
        }
    }
    result
}

fn fetch_document<T: Transport + ?Sized>(
    record: &mut TransactionRecord,
    ctx: &PhaseContext,
    settings: &FetchSettings,
    limits: FetchLimits,
    transport: &T,
) -> Result<(), FetchError> {
    let request = FetchRequest {
        url: directive_url(settings)?,
        headers: forwarded_headers(ctx, settings),
        connect_timeout: settings.connect_timeout,
        timeout: settings.timeout,
        // One extra byte tells an exact-limit body from an oversized one.
        body_limit: limits.max_body_bytes.saturating_add(1),
    };

    tracing::debug!(id = ?record.id(), url = %request.url, "Fetching directives");
    let response = transport.perform(&request)?;

    if response.status != 200 {
        let note = format!("fetch err: {} response", response.status);
        tracing::warn!(id = ?record.id(), status = response.status, "Directive backend returned non-200");
        record.set_error(note);
    }

    let body = String::from_utf8(response.body).map_err(|_| FetchError::NotUtf8)?;
    if body.is_empty() {
        return Err(FetchError::EmptyBody);
    }
    if body.len() > limits.max_body_bytes {
        return Err(FetchError::TooLarge(body.len()));
    }
    if !has_json_delimiters(&body) {
        return Err(FetchError::BadDelimiters);
    }

    let tokens: Vec<Token> = tokenize(&body, limits.max_tokens)?;
    tracing::debug!(id = ?record.id(), tokens = tokens.len(), bytes = body.len(), "Directives parsed");
    record.store_document(body, tokens);
    Ok(())
}

/// Cheap shape check: after trimming whitespace the document must open and
/// close with a matched `{}` or `[]` pair.
pub fn has_json_delimiters(body: &str) -> bool {
    let trimmed = body.trim_matches(|c: char| c.is_ascii_whitespace());
    matches!(
        (trimmed.as_bytes().first(), trimmed.as_bytes().last()),
        (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']'))
    )
}

/// Resolve the fetch target to an absolute URL.
pub fn directive_url(settings: &FetchSettings) -> Result<Url, FetchError> {
    let raw = match &settings.target {
        None => return Err(FetchError::NoTarget),
        Some(FetchTarget::Url(url)) => url.clone(),
        Some(FetchTarget::Backend { address, .. }) => {
            let slash = if settings.path.starts_with('/') { "" } else { "/" };
            format!("http://{}{}{}", address, slash, settings.path)
        }
    };
    Url::parse(&raw).map_err(|e| FetchError::InvalidUrl {
        url: raw,
        reason: e.to_string(),
    })
}

/// The header lines sent to the directive backend: the synthesized
/// forwarding headers, then the client's request headers minus `Via` and
/// `Content-Length`, with `Accept-Encoding` forced to identity.
pub fn forwarded_headers(ctx: &PhaseContext, settings: &FetchSettings) -> Vec<String> {
    let mut lines = Vec::with_capacity(ctx.req.len() + 4);
    lines.push(format!("X-Forwarded-Method: {}", ctx.method));
    lines.push(format!("X-Forwarded-Url: {}", ctx.url));
    lines.push(format!("Via: {} VMOD-HeaderProxy", ctx.proto));

    if let Some(host) = &settings.host {
        lines.push(format!("Host: {}", host));
        if let Some(client_host) = ctx.req.get(&H_HOST) {
            lines.push(format!("X-Forwarded-Host: {}", client_host));
        }
    }

    for line in ctx.req.iter() {
        if H_VIA.matches(line) || H_CONTENT_LENGTH.matches(line) {
            continue;
        }
        if H_ACCEPT_ENCODING.matches(line) {
            lines.push("Accept-Encoding: identity".to_string());
        } else if settings.host.is_some() && H_HOST.matches(line) {
            continue;
        } else {
            lines.push(line.to_string());
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directive::transport::FetchResponse;
    use crate::phase::Phase;
    use crate::pool::TransactionId;
    use std::sync::Mutex;

    struct StubTransport {
        response: Result<FetchResponse, TransportError>,
        seen: Mutex<Vec<FetchRequest>>,
    }

    impl StubTransport {
        fn ok(status: u16, body: &str) -> Self {
            Self {
                response: Ok(FetchResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                }),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Transport for StubTransport {
        fn perform(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.response.clone()
        }
    }

    fn settings() -> FetchSettings {
        FetchSettings {
            target: Some(FetchTarget::Backend {
                name: "directives".into(),
                address: "127.0.0.1:8090".into(),
            }),
            path: "/directives".into(),
            ..FetchSettings::default()
        }
    }

    fn record() -> TransactionRecord {
        let mut record = TransactionRecord::default();
        record.assign(TransactionId(1));
        record
    }

    #[test]
    fn test_delimiter_precheck() {
        for bad in ["   ", "", "abc", "{\"a\":1]", "[1,2}", "{", "}"] {
            assert!(!has_json_delimiters(bad), "{bad:?}");
        }
        for good in ["{}", " [1,2] ", "\n{\"a\": 1}\t"] {
            assert!(has_json_delimiters(good), "{good:?}");
        }
    }

    #[test]
    fn test_backend_url_joins_path() {
        let mut s = settings();
        assert_eq!(directive_url(&s).unwrap().as_str(), "http://127.0.0.1:8090/directives");
        s.path = "x?y=1".into();
        assert_eq!(directive_url(&s).unwrap().as_str(), "http://127.0.0.1:8090/x?y=1");
        s.target = Some(FetchTarget::Url("http://example.test/d".into()));
        assert_eq!(directive_url(&s).unwrap().as_str(), "http://example.test/d");
        s.target = None;
        assert_eq!(directive_url(&s), Err(FetchError::NoTarget));
    }

    #[test]
    fn test_forwarded_headers() {
        let mut ctx = PhaseContext::new(Phase::Receive);
        ctx.method = "POST".into();
        ctx.url = "/about".into();
        ctx.req = crate::headers::HeaderList::from_lines([
            "Host: www.example.test",
            "Via: 1.1 edge",
            "Content-Length: 12",
            "Accept-Encoding: gzip, br",
            "Cookie: a=1",
        ]);

        let lines = forwarded_headers(&ctx, &settings());
        assert_eq!(
            lines,
            vec![
                "X-Forwarded-Method: POST",
                "X-Forwarded-Url: /about",
                "Via: HTTP/1.1 VMOD-HeaderProxy",
                "Host: www.example.test",
                "Accept-Encoding: identity",
                "Cookie: a=1",
            ]
        );

        let mut s = settings();
        s.host = Some("directives.internal".into());
        let lines = forwarded_headers(&ctx, &s);
        assert!(lines.contains(&"Host: directives.internal".to_string()));
        assert!(lines.contains(&"X-Forwarded-Host: www.example.test".to_string()));
        assert!(!lines.contains(&"Host: www.example.test".to_string()));
    }

    #[test]
    fn test_fetch_stores_tokens_once() {
        let transport = StubTransport::ok(200, r#"{"vcl_recv": ["X-A: 1"]}"#);
        let ctx = PhaseContext::new(Phase::Receive);
        let mut record = record();

        fetch(&mut record, &ctx, &settings(), FetchLimits::default(), &transport).unwrap();
        assert!(!record.tokens().is_empty());
        assert!(record.error().is_none());

        fetch(&mut record, &ctx, &settings(), FetchLimits::default(), &transport).unwrap();
        assert_eq!(transport.calls(), 1);
    }

    #[test]
    fn test_non_200_is_soft_failure() {
        let transport = StubTransport::ok(404, r#"{"vcl_recv": []}"#);
        let mut record = record();
        fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), FetchLimits::default(), &transport)
            .unwrap();
        assert_eq!(record.error(), Some("fetch err: 404 response"));
        assert!(!record.tokens().is_empty());
    }

    #[test]
    fn test_loose_primitives_in_ignored_sections() {
        let transport = StubTransport::ok(200, r#"{"vcl_recv": ["X-A: 1"], "ttl": 01, "debug": yes}"#);
        let mut record = record();
        fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), FetchLimits::default(), &transport)
            .unwrap();
        assert!(record.error().is_none());
        assert_eq!(record.tokens().len(), 8);
    }

    #[test]
    fn test_shape_failures_abort() {
        let cases = [
            ("", FetchError::EmptyBody),
            ("<html></html>", FetchError::BadDelimiters),
            ("{\"a\": }", FetchError::Parse(TokenizeError::Invalid(6))),
        ];
        for (body, expected) in cases {
            let transport = StubTransport::ok(200, body);
            let mut record = record();
            let err = fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), FetchLimits::default(), &transport)
                .unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(record.error(), Some(expected.to_string().as_str()));
            assert!(record.tokens().is_empty());
        }
    }

    #[test]
    fn test_body_limit() {
        let limits = FetchLimits {
            max_body_bytes: 8,
            max_tokens: 16,
        };
        let transport = StubTransport::ok(200, "[1,2,3,4,5]");
        let mut record = record();
        let err = fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), limits, &transport).unwrap_err();
        assert_eq!(err, FetchError::TooLarge(11));
        assert_eq!(transport.seen.lock().unwrap()[0].body_limit, 9);
    }

    #[test]
    fn test_token_budget_exceeded() {
        let limits = FetchLimits {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_tokens: 4,
        };
        let transport = StubTransport::ok(200, "[[[[[[1]]]]]]");
        let mut record = record();
        let err = fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), limits, &transport).unwrap_err();
        assert!(matches!(err, FetchError::Parse(TokenizeError::NoMemory(_))));
        assert!(record.tokens().is_empty());
    }

    #[test]
    fn test_transport_failure_recorded() {
        let transport = StubTransport {
            response: Err(TransportError::Timeout),
            seen: Mutex::new(Vec::new()),
        };
        let mut record = record();
        let err = fetch(&mut record, &PhaseContext::new(Phase::Receive), &settings(), FetchLimits::default(), &transport)
            .unwrap_err();
        assert_eq!(err, FetchError::Transport(TransportError::Timeout));
        assert_eq!(record.error(), Some("fetch err: timed out"));
    }
}
