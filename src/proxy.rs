//! Host-facing entry points.
//!
//! A host calls [`HeaderProxy::call`] from its receive phase and
//! [`HeaderProxy::process`] from every later phase. Neither ever fails the
//! host's request: problems are logged and kept on the transaction for
//! [`HeaderProxy::error`].
//!
//! Record guards are always dropped before the pool is called again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;

use crate::config::schema::{timeout_from_secs, BackendConfig, HeaderProxyConfig, PoolConfig};
use crate::config::{validate_config, ConfigError, ValidationError};
use crate::correlation;
use crate::directive::interpreter::{apply, plan, CollectRule};
use crate::directive::{fetch, FetchLimits, ReqwestTransport, Transport};
use crate::headers::HeaderName;
use crate::phase::{Phase, PhaseContext};
use crate::pool::{
    FetchSettings, FetchTarget, PoolSettings, TransactionHandle, TransactionPool, TransactionRecord,
};

/// A resolved named backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendSettings {
    pub address: String,
    pub connect_timeout: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// Configuration resolved into the forms the hot path uses.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Copied into a record the first time a transaction customises it.
    pub fetch: FetchSettings,
    pub backends: HashMap<String, BackendSettings>,
    pub limits: FetchLimits,
    pub correlation: HeaderName,
    pub collect: CollectRule,
}

impl Settings {
    pub fn from_config(config: &HeaderProxyConfig) -> Result<Self, ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;

        let correlation = HeaderName::new(&config.correlation.header).map_err(|e| header_error("correlation.header", e))?;
        let collect_name = HeaderName::new(&config.collect.header).map_err(|e| header_error("collect.header", e))?;
        let separator = config
            .collect
            .separator
            .chars()
            .next()
            .ok_or_else(|| ConfigError::Validation(vec![ValidationError::Separator(String::new())]))?;

        let fetch = FetchSettings {
            target: config.fetch.url.clone().map(FetchTarget::Url),
            path: config.fetch.path.clone(),
            host: config.fetch.host.clone(),
            connect_timeout: timeout_from_secs(config.fetch.connect_timeout_secs),
            timeout: timeout_from_secs(config.fetch.timeout_secs),
        };

        let backends = config
            .backends
            .iter()
            .map(|b| (b.name.clone(), backend_settings(b, &fetch)))
            .collect();

        Ok(Self {
            fetch,
            backends,
            limits: FetchLimits {
                max_body_bytes: config.fetch.max_body_bytes,
                max_tokens: config.fetch.max_tokens,
            },
            correlation,
            collect: CollectRule {
                name: collect_name,
                separator,
            },
        })
    }
}

fn header_error(field: &'static str, e: crate::headers::HeaderNameError) -> ConfigError {
    ConfigError::Validation(vec![ValidationError::HeaderName {
        field,
        reason: e.to_string(),
    }])
}

fn backend_settings(backend: &BackendConfig, defaults: &FetchSettings) -> BackendSettings {
    BackendSettings {
        address: backend.address.clone(),
        connect_timeout: backend
            .connect_timeout_secs
            .map_or(defaults.connect_timeout, timeout_from_secs),
        timeout: backend.timeout_secs.map_or(defaults.timeout, timeout_from_secs),
    }
}

impl From<&PoolConfig> for PoolSettings {
    fn from(config: &PoolConfig) -> Self {
        Self {
            capacity: config.capacity,
            stale_after: Duration::from_secs(config.stale_after_secs),
            gc_sample_rate: config.gc_sample_rate,
        }
    }
}

/// Directive proxy bound to one pool and one transport.
pub struct HeaderProxy<T: Transport = ReqwestTransport> {
    settings: ArcSwap<Settings>,
    pool: Arc<TransactionPool>,
    transport: T,
}

impl HeaderProxy<ReqwestTransport> {
    pub fn new(config: &HeaderProxyConfig) -> Result<Self, ConfigError> {
        Self::with_transport(config, ReqwestTransport::new())
    }
}

impl<T: Transport> HeaderProxy<T> {
    pub fn with_transport(config: &HeaderProxyConfig, transport: T) -> Result<Self, ConfigError> {
        let pool = Arc::new(TransactionPool::new(PoolSettings::from(&config.pool)));
        Self::with_pool(config, transport, pool)
    }

    /// Use an existing pool, e.g. one built with a manual clock.
    pub fn with_pool(config: &HeaderProxyConfig, transport: T, pool: Arc<TransactionPool>) -> Result<Self, ConfigError> {
        let settings = Settings::from_config(config)?;
        Ok(Self {
            settings: ArcSwap::from_pointee(settings),
            pool,
            transport,
        })
    }

    pub fn pool(&self) -> &Arc<TransactionPool> {
        &self.pool
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.load_full()
    }

    /// Swap in a new configuration. Transactions in flight keep the fetch
    /// settings already copied into their records.
    pub fn reload(&self, config: &HeaderProxyConfig) -> Result<(), ConfigError> {
        let settings = Settings::from_config(config)?;
        self.settings.store(Arc::new(settings));
        self.pool.update_settings(PoolSettings::from(&config.pool));
        tracing::info!(backends = config.backends.len(), capacity = config.pool.capacity, "Settings reloaded");
        Ok(())
    }

    /// Fetch directives through the named backend for this transaction.
    pub fn set_backend(&self, ctx: &mut PhaseContext, name: &str) {
        let settings = self.settings.load();
        let backend = settings.backends.get(name).cloned();
        self.customise(ctx, &settings, "backend", |record| match backend {
            Some(backend) => {
                let fetch = record.fetch_settings_mut(|| settings.fetch.clone());
                fetch.target = Some(FetchTarget::Backend {
                    name: name.to_string(),
                    address: backend.address,
                });
                fetch.connect_timeout = backend.connect_timeout;
                fetch.timeout = backend.timeout;
            }
            None => {
                tracing::warn!(backend = %name, "Unknown directive backend");
                record.set_error(format!("unknown backend {name}"));
            }
        });
    }

    /// Path requested from the selected backend.
    pub fn set_path(&self, ctx: &mut PhaseContext, path: &str) {
        let settings = self.settings.load();
        self.customise(ctx, &settings, "path", |record| {
            record.fetch_settings_mut(|| settings.fetch.clone()).path = path.to_string();
        });
    }

    /// Host header sent to the directive backend.
    pub fn set_host(&self, ctx: &mut PhaseContext, host: &str) {
        let settings = self.settings.load();
        self.customise(ctx, &settings, "host", |record| {
            record.fetch_settings_mut(|| settings.fetch.clone()).host = Some(host.to_string());
        });
    }

    /// Receive phase: join or start the transaction, fetch its directive
    /// document once, and apply the receive directives to the request.
    pub fn call(&self, ctx: &mut PhaseContext) {
        if ctx.phase != Phase::Receive {
            tracing::warn!(phase = %ctx.phase, "invalid call outside vcl_recv");
            return;
        }
        let settings = self.settings.load_full();
        let Some(handle) = self.begin(ctx, &settings) else {
            return;
        };
        let Ok(mut record) = handle.lock() else {
            return;
        };

        record.visit(Phase::Receive);
        if ctx.restarts > record.restarts() {
            tracing::debug!(id = %handle.id(), restarts = ctx.restarts, "Transaction restarted, fetching again");
            record.restart(ctx.restarts);
        }

        let _ = fetch(&mut record, ctx, &settings.fetch, settings.limits, &self.transport);
        interpret(&mut record, ctx, &settings.collect);
    }

    /// Any later phase: rejoin the transaction, apply this phase's
    /// directives and release the record once the transaction is over.
    pub fn process(&self, ctx: &mut PhaseContext) {
        let phase = ctx.phase;
        if phase == Phase::Receive {
            tracing::warn!("process called in vcl_recv, use call");
            return;
        }
        let settings = self.settings.load_full();
        let Some(handle) = correlation::extract_for_phase(ctx, &settings.correlation)
            .and_then(|id| self.pool.resume(id))
        else {
            tracing::debug!(phase = %phase, "No transaction to resume");
            return;
        };

        // ESI includes share the parent's id; only the top level may end it.
        let esi_child = phase == Phase::Deliver && ctx.esi_level > 0;
        {
            let Ok(mut record) = handle.lock() else {
                return;
            };
            if !esi_child {
                record.visit(phase);
            }
            if phase.target().is_some() {
                interpret(&mut record, ctx, &settings.collect);
            }
        }

        if phase != Phase::BackendFetch && !esi_child {
            if let Err(e) = self.pool.release(&handle, phase) {
                tracing::debug!(id = %handle.id(), error = %e, "Release skipped");
            }
        }
    }

    /// Run whichever entry point fits the context's phase.
    pub fn run_phase(&self, ctx: &mut PhaseContext) {
        match ctx.phase {
            Phase::Receive => self.call(ctx),
            _ => self.process(ctx),
        }
    }

    /// Last diagnostic recorded for the current transaction. Never creates a
    /// transaction.
    pub fn error(&self, ctx: &PhaseContext) -> Option<String> {
        let id = match ctx.phase {
            // Before `call` the request header is still the client's own.
            Phase::Receive => ctx.transaction?,
            _ => correlation::extract_for_phase(ctx, &self.settings.load().correlation)?,
        };
        let handle = self.pool.acquire(Some(id), false).ok().flatten()?;
        let record = handle.lock().ok()?;
        record.error().map(str::to_string)
    }

    /// Recover or start the transaction for a receive call and tag the
    /// request with its id.
    ///
    /// A correlation header on a fresh request came from the client and is
    /// dropped. It is only trusted after a restart, where the first pass
    /// already overwrote it.
    fn begin(&self, ctx: &mut PhaseContext, settings: &Settings) -> Option<TransactionHandle> {
        let hint = match ctx.transaction {
            Some(id) => Some(id),
            None if ctx.restarts > 0 => correlation::extract(&ctx.req, &settings.correlation),
            None => {
                if ctx.req.contains(&settings.correlation) {
                    tracing::warn!(header = %settings.correlation, "Dropping client-supplied correlation header");
                    ctx.req.unset(&settings.correlation);
                }
                None
            }
        };
        match self.pool.acquire(hint, true) {
            Ok(Some(handle)) => {
                correlation::inject(&mut ctx.req, &settings.correlation, handle.id());
                ctx.transaction = Some(handle.id());
                Some(handle)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "No transaction record available");
                None
            }
        }
    }

    fn customise(
        &self,
        ctx: &mut PhaseContext,
        settings: &Settings,
        what: &'static str,
        update: impl FnOnce(&mut TransactionRecord),
    ) {
        if ctx.phase != Phase::Receive {
            tracing::warn!(phase = %ctx.phase, setting = what, "invalid call outside vcl_recv");
            return;
        }
        let Some(handle) = self.begin(ctx, settings) else {
            return;
        };
        if let Ok(mut record) = handle.lock() {
            update(&mut record);
        };
    }
}

fn interpret(record: &mut TransactionRecord, ctx: &mut PhaseContext, collect: &CollectRule) {
    if record.tokens().is_empty() {
        return;
    }
    let plan = plan(record.body(), record.tokens(), ctx.phase, ctx.esi_level);
    if let Err(e) = apply(plan, ctx, collect) {
        tracing::warn!(id = ?record.id(), phase = %ctx.phase, error = %e, "Directive processing failed");
        record.set_error(e.to_string());
    }
}

impl<T: Transport> std::fmt::Debug for HeaderProxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderProxy")
            .field("settings", &self.settings.load_full())
            .field("pool", &self.pool)
            .finish()
    }
}
