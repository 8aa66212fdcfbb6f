//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files and
//! every section has defaults, so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::correlation::DEFAULT_CORRELATION_HEADER;
use crate::directive::{DEFAULT_MAX_BODY_BYTES, DEFAULT_MAX_TOKENS};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct HeaderProxyConfig {
    /// How directive documents are fetched.
    pub fetch: FetchConfig,

    /// Named directive backends selectable per transaction.
    pub backends: Vec<BackendConfig>,

    /// Transaction pool sizing and reclamation.
    pub pool: PoolConfig,

    pub correlation: CorrelationConfig,

    /// The header folded instead of overwritten.
    pub collect: CollectConfig,

    pub observability: ObservabilityConfig,

    /// Reference directive backend.
    pub server: ServerConfig,
}

impl HeaderProxyConfig {
    pub fn backend(&self, name: &str) -> Option<&BackendConfig> {
        self.backends.iter().find(|b| b.name == name)
    }
}

/// Default fetch parameters.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    /// Absolute directive URL used when no backend is selected.
    pub url: Option<String>,

    /// Path appended to a backend address.
    pub path: String,

    /// Host header sent to the directive backend.
    pub host: Option<String>,

    /// Connect timeout in seconds; zero or less disables it.
    pub connect_timeout_secs: f64,

    /// Total timeout in seconds; zero or less disables it.
    pub timeout_secs: f64,

    /// Largest accepted document.
    pub max_body_bytes: usize,

    /// Token budget per document.
    pub max_tokens: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: None,
            path: "/".to_string(),
            host: None,
            connect_timeout_secs: -1.0,
            timeout_secs: -1.0,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// A named directive backend.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BackendConfig {
    /// Unique backend identifier.
    pub name: String,

    /// Backend address (e.g., "127.0.0.1:8090").
    pub address: String,

    /// Overrides `fetch.connect_timeout_secs`.
    #[serde(default)]
    pub connect_timeout_secs: Option<f64>,

    /// Overrides `fetch.timeout_secs`.
    #[serde(default)]
    pub timeout_secs: Option<f64>,
}

/// Transaction pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum records; match the host's worker ceiling.
    pub capacity: usize,

    /// Busy records idle for longer than this are reclaimed.
    pub stale_after_secs: u64,

    /// Fraction of acquires that run garbage collection.
    pub gc_sample_rate: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 5000,
            stale_after_secs: 300,
            gc_sample_rate: 0.01,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Header carrying the transaction id between phases.
    pub header: String,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_CORRELATION_HEADER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct CollectConfig {
    pub header: String,
    pub separator: String,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            header: "Cookie".to_string(),
            separator: ";".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Serve Prometheus metrics from the binaries.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Reference directive backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8090").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8090".to_string(),
            request_timeout_secs: 5,
        }
    }
}

/// Seconds to an optional timeout; zero or negative means none.
pub fn timeout_from_secs(secs: f64) -> Option<Duration> {
    (secs > 0.0 && secs.is_finite()).then(|| Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: HeaderProxyConfig = toml::from_str("").unwrap();
        assert_eq!(config, HeaderProxyConfig::default());
        assert_eq!(config.fetch.max_body_bytes, 0x1FFFF);
        assert_eq!(config.pool.capacity, 5000);
        assert_eq!(config.correlation.header, "X-Header-Proxy-Id");
        assert_eq!(config.collect.separator, ";");
    }

    #[test]
    fn test_full_config() {
        let config: HeaderProxyConfig = toml::from_str(
            r#"
            [fetch]
            path = "/directives"
            timeout_secs = 1.5

            [[backends]]
            name = "geo"
            address = "10.0.0.5:8090"
            connect_timeout_secs = 0.25

            [pool]
            capacity = 64

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.fetch.path, "/directives");
        assert_eq!(config.backend("geo").unwrap().connect_timeout_secs, Some(0.25));
        assert!(config.backend("other").is_none());
        assert_eq!(config.pool.capacity, 64);
        assert_eq!(config.pool.stale_after_secs, 300);
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_timeouts_apply_only_when_positive() {
        assert_eq!(timeout_from_secs(-1.0), None);
        assert_eq!(timeout_from_secs(0.0), None);
        assert_eq!(timeout_from_secs(f64::NAN), None);
        assert_eq!(timeout_from_secs(2.5), Some(Duration::from_millis(2500)));
    }
}
