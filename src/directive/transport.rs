//! Outbound HTTP client used to fetch directive documents.
//!
//! # Design Decisions
//! - The core only needs "GET this URL with these headers and timeouts"; the
//!   `Transport` trait is that seam, so tests and embedders can swap it
//! - The default implementation is a blocking reqwest client because phase
//!   callbacks are synchronous
//! - Redirects are not followed and the response is never decoded

use std::collections::HashMap;
use std::io::Read;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use thiserror::Error;
use url::Url;

use crate::headers::name::split_line;

/// A directive fetch, ready to send.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: Url,
    /// Raw `Name: value` lines, sent in order.
    pub headers: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
    /// Stop reading the body after this many bytes.
    pub body_limit: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("timed out")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Other(e.to_string())
        }
    }
}

/// Performs one synchronous GET.
pub trait Transport: Send + Sync {
    fn perform(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn perform(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        (**self).perform(request)
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn perform(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        (**self).perform(request)
    }
}

/// Blocking reqwest transport.
///
/// reqwest fixes the connect timeout per client, so one client is kept per
/// distinct connect timeout.
#[derive(Default)]
pub struct ReqwestTransport {
    clients: Mutex<HashMap<Option<Duration>, Client>>,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self, connect_timeout: Option<Duration>) -> Result<Client, TransportError> {
        let mut clients = self.clients.lock().expect("transport client mutex poisoned");
        if let Some(client) = clients.get(&connect_timeout) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .redirect(Policy::none())
            .timeout(None::<Duration>);
        if let Some(timeout) = connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        let client = builder.build()?;
        clients.insert(connect_timeout, client.clone());
        Ok(client)
    }
}

impl Transport for ReqwestTransport {
    fn perform(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let client = self.client(request.connect_timeout)?;

        let mut builder = client
            .get(request.url.clone())
            .headers(header_map(&request.headers));
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send()?;
        let status = response.status().as_u16();

        let mut body = Vec::new();
        response
            .take(request.body_limit as u64)
            .read_to_end(&mut body)
            .map_err(|e| TransportError::Other(format!("reading body: {e}")))?;

        Ok(FetchResponse { status, body })
    }
}

/// Convert raw lines into a header map, skipping lines reqwest would reject.
fn header_map(lines: &[String]) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(lines.len());
    for line in lines {
        let Some((name, value)) = split_line(line) else {
            continue;
        };
        match (
            HeaderName::from_bytes(name.trim().as_bytes()),
            HeaderValue::from_str(value.trim_end()),
        ) {
            (Ok(name), Ok(value)) => {
                map.append(name, value);
            }
            _ => tracing::debug!(line = %line, "Skipping unsendable header"),
        }
    }
    map
}
