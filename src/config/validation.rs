//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check backend names are unique and addresses usable
//! - Validate value ranges (capacity, token budget, sample rate)
//! - Check configured header names and the collect separator
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HeaderProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::HeaderProxyConfig;
use crate::headers::HeaderName;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("backend name must not be empty")]
    EmptyBackendName,

    #[error("duplicate backend name {0:?}")]
    DuplicateBackend(String),

    #[error("backend {name:?}: address {address:?} is not host:port")]
    BadBackendAddress { name: String, address: String },

    #[error("fetch.url {url:?} is not an absolute http(s) URL")]
    BadFetchUrl { url: String },

    #[error("fetch.max_tokens must be at least 1")]
    ZeroTokenBudget,

    #[error("fetch.max_body_bytes must be at least 2")]
    BodyLimitTooSmall,

    #[error("pool.capacity must be at least 1")]
    ZeroCapacity,

    #[error("pool.gc_sample_rate {0} is outside 0..=1")]
    SampleRate(String),

    #[error("{field}: {reason}")]
    HeaderName { field: &'static str, reason: String },

    #[error("collect.separator {0:?} must be one visible ASCII character")]
    Separator(String),

    #[error("server.bind_address {0:?} is not a socket address")]
    BindAddress(String),
}

pub fn validate_config(config: &HeaderProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let mut seen = HashSet::new();
    for backend in &config.backends {
        if backend.name.is_empty() {
            errors.push(ValidationError::EmptyBackendName);
        } else if !seen.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateBackend(backend.name.clone()));
        }
        if !is_host_port(&backend.address) {
            errors.push(ValidationError::BadBackendAddress {
                name: backend.name.clone(),
                address: backend.address.clone(),
            });
        }
    }

    if let Some(url) = &config.fetch.url {
        let ok = Url::parse(url)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false);
        if !ok {
            errors.push(ValidationError::BadFetchUrl { url: url.clone() });
        }
    }
    if config.fetch.max_tokens == 0 {
        errors.push(ValidationError::ZeroTokenBudget);
    }
    // "{}" is the smallest document.
    if config.fetch.max_body_bytes < 2 {
        errors.push(ValidationError::BodyLimitTooSmall);
    }

    if config.pool.capacity == 0 {
        errors.push(ValidationError::ZeroCapacity);
    }
    let rate = config.pool.gc_sample_rate;
    if !(0.0..=1.0).contains(&rate) {
        errors.push(ValidationError::SampleRate(rate.to_string()));
    }

    for (field, name) in [
        ("correlation.header", &config.correlation.header),
        ("collect.header", &config.collect.header),
    ] {
        if let Err(e) = HeaderName::new(name) {
            errors.push(ValidationError::HeaderName {
                field,
                reason: e.to_string(),
            });
        }
    }

    let sep = &config.collect.separator;
    if sep.len() != 1 || !sep.bytes().all(|b| b.is_ascii_graphic()) {
        errors.push(ValidationError::Separator(sep.clone()));
    }

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.server.bind_address.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `host:port` with a numeric port, the form the fetch URL is built from.
fn is_host_port(address: &str) -> bool {
    match address.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}
