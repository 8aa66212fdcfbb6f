//! Bounded registry of reusable transaction records.
//!
//! # Locking
//! - The slot table is an `RwLock<Vec<Arc<Slot>>>`. Lookups by id take the
//!   read lock; anything that changes which transaction owns a slot
//!   (acquire, release, garbage collection) takes the write lock.
//! - Ownership (`id`, `generation`) lives in atomics beside the record, so a
//!   lookup never waits on a record that another thread is working on.
//! - Lock order is table, then record. Callers must drop their record guard
//!   before calling `release`. Garbage collection only `try_lock`s records,
//!   so a record in use is never reclaimed under its owner.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::correlation::{retention, Retention};
use crate::observability::metrics;
use crate::phase::Phase;
use crate::pool::clock::{Clock, RandomSampler, Sampler, SystemClock};
use crate::pool::record::{TransactionId, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// Every slot is busy and the pool is at its ceiling.
    #[error("pool exhausted: all {capacity} records busy")]
    Exhausted { capacity: usize },

    /// The slot was released or handed to another transaction.
    #[error("stale transaction handle for id {0}")]
    Stale(TransactionId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    /// Hard ceiling on records, busy or idle.
    pub capacity: usize,
    /// Busy records untouched for longer than this are reclaimed.
    pub stale_after: Duration,
    /// Fraction of acquires that also run a garbage collection pass.
    pub gc_sample_rate: f64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            capacity: 5000,
            stale_after: Duration::from_secs(300),
            gc_sample_rate: 0.01,
        }
    }
}

/// Occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub records: usize,
    pub busy: usize,
}

#[derive(Debug)]
struct Slot {
    /// Busy transaction id; zero when idle.
    id: AtomicU64,
    /// Bumped every time ownership changes.
    generation: AtomicU64,
    /// Milliseconds since the pool epoch.
    last_activity: AtomicU64,
    record: Mutex<TransactionRecord>,
}

impl Slot {
    fn new() -> Self {
        Self {
            id: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            last_activity: AtomicU64::new(0),
            record: Mutex::new(TransactionRecord::default()),
        }
    }

    fn is_busy(&self) -> bool {
        self.id.load(Ordering::Acquire) != 0
    }

    /// Return to idle. Caller holds the table write lock and the record.
    fn vacate(&self, record: &mut TransactionRecord) {
        record.reset();
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.id.store(0, Ordering::Release);
    }
}

/// A claim on one busy record, valid until the record is released.
#[derive(Debug, Clone)]
pub struct TransactionHandle {
    slot: Arc<Slot>,
    generation: u64,
    id: TransactionId,
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Lock the record, failing if the slot changed owner since this handle
    /// was issued.
    pub fn lock(&self) -> Result<MutexGuard<'_, TransactionRecord>, PoolError> {
        let record = self.slot.record.lock().expect("transaction record mutex poisoned");
        if self.slot.generation.load(Ordering::Acquire) != self.generation {
            return Err(PoolError::Stale(self.id));
        }
        Ok(record)
    }

    pub fn is_current(&self) -> bool {
        self.slot.generation.load(Ordering::Acquire) == self.generation
    }
}

/// Registry of transaction records.
pub struct TransactionPool {
    slots: RwLock<Vec<Arc<Slot>>>,
    settings: ArcSwap<PoolSettings>,
    next_id: AtomicU64,
    gc_running: AtomicBool,
    clock: Arc<dyn Clock>,
    sampler: Arc<dyn Sampler>,
    epoch: Instant,
}

impl TransactionPool {
    pub fn new(settings: PoolSettings) -> Self {
        Self::with_sources(settings, Arc::new(SystemClock), Arc::new(RandomSampler))
    }

    /// Build a pool with explicit time and sampling sources.
    pub fn with_sources(settings: PoolSettings, clock: Arc<dyn Clock>, sampler: Arc<dyn Sampler>) -> Self {
        let epoch = clock.now();
        Self {
            slots: RwLock::new(Vec::new()),
            settings: ArcSwap::from_pointee(settings),
            next_id: AtomicU64::new(1),
            gc_running: AtomicBool::new(false),
            clock,
            sampler,
            epoch,
        }
    }

    pub fn settings(&self) -> Arc<PoolSettings> {
        self.settings.load_full()
    }

    /// Replace the settings. A lower capacity only limits new records.
    pub fn update_settings(&self, settings: PoolSettings) {
        self.settings.store(Arc::new(settings));
    }

    /// Find the busy record for `hint`, or claim a record for a new
    /// transaction when `allow_create` is set.
    pub fn acquire(
        &self,
        hint: Option<TransactionId>,
        allow_create: bool,
    ) -> Result<Option<TransactionHandle>, PoolError> {
        self.maybe_collect_garbage();

        if let Some(handle) = hint.and_then(|id| self.resume(id)) {
            return Ok(Some(handle));
        }
        if !allow_create {
            return Ok(None);
        }

        let mut slots = self.slots.write().expect("pool table lock poisoned");
        if let Some(slot) = slots.iter().find(|slot| !slot.is_busy()) {
            return Ok(Some(self.claim(slot)));
        }

        let capacity = self.settings.load().capacity;
        if slots.len() >= capacity {
            tracing::warn!(capacity, "Transaction pool exhausted");
            metrics::record_pool_exhausted();
            return Err(PoolError::Exhausted { capacity });
        }

        let slot = Arc::new(Slot::new());
        slots.push(slot.clone());
        metrics::record_pool_size(slots.len());
        tracing::debug!(records = slots.len(), "Transaction pool grew");
        Ok(Some(self.claim(&slot)))
    }

    /// Find the busy record with this id.
    pub fn resume(&self, id: TransactionId) -> Option<TransactionHandle> {
        if id.0 == 0 {
            return None;
        }
        let slots = self.slots.read().expect("pool table lock poisoned");
        let slot = slots.iter().find(|slot| slot.id.load(Ordering::Acquire) == id.0)?;
        slot.last_activity.store(self.now_millis(), Ordering::Relaxed);
        Some(TransactionHandle {
            slot: slot.clone(),
            generation: slot.generation.load(Ordering::Acquire),
            id,
        })
    }

    /// Record that `phase` happened and release the record if the
    /// transaction is over.
    pub fn release(&self, handle: &TransactionHandle, phase: Phase) -> Result<Retention, PoolError> {
        let _slots = self.slots.write().expect("pool table lock poisoned");
        let mut record = handle.lock()?;
        record.visit(phase);

        let decision = retention(record.visited(), phase);
        if decision == Retention::Release {
            handle.slot.vacate(&mut record);
            tracing::debug!(id = %handle.id, phase = %phase, "Transaction released");
        } else {
            tracing::debug!(id = %handle.id, phase = %phase, "Transaction retained");
        }
        Ok(decision)
    }

    /// Run a collection on a sampled fraction of calls.
    pub fn maybe_collect_garbage(&self) -> usize {
        let rate = self.settings.load().gc_sample_rate;
        if !self.sampler.sample(rate) {
            return 0;
        }
        self.collect_garbage()
    }

    /// Reclaim busy records nobody has touched within the staleness window.
    /// At most one pass runs at a time; a concurrent caller returns 0.
    pub fn collect_garbage(&self) -> usize {
        let Some(_flight) = GcFlight::enter(&self.gc_running) else {
            return 0;
        };

        let stale_after = self.settings.load().stale_after.as_millis() as u64;
        let now = self.now_millis();
        let mut reclaimed = 0;

        let slots = self.slots.write().expect("pool table lock poisoned");
        for slot in slots.iter().filter(|slot| slot.is_busy()) {
            let idle_for = now.saturating_sub(slot.last_activity.load(Ordering::Relaxed));
            if idle_for <= stale_after {
                continue;
            }
            // A locked record is in use, hence not stale.
            let Ok(mut record) = slot.record.try_lock() else {
                continue;
            };
            tracing::debug!(
                id = slot.id.load(Ordering::Acquire),
                idle_ms = idle_for,
                "Reclaiming stale transaction"
            );
            slot.vacate(&mut record);
            reclaimed += 1;
        }

        if reclaimed > 0 {
            tracing::info!(reclaimed, records = slots.len(), "Stale transactions reclaimed");
        }
        metrics::record_gc(reclaimed);
        reclaimed
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.slots.read().expect("pool table lock poisoned");
        PoolStats {
            records: slots.len(),
            busy: slots.iter().filter(|slot| slot.is_busy()).count(),
        }
    }

    /// Hand an idle slot to a new transaction. Caller holds the write lock.
    fn claim(&self, slot: &Arc<Slot>) -> TransactionHandle {
        let mut record = slot.record.lock().expect("transaction record mutex poisoned");
        let id = self.issue_id();
        record.assign(id);
        let generation = slot.generation.fetch_add(1, Ordering::AcqRel) + 1;
        slot.last_activity.store(self.now_millis(), Ordering::Relaxed);
        slot.id.store(id.0, Ordering::Release);
        tracing::debug!(id = %id, "Transaction acquired");
        TransactionHandle {
            slot: slot.clone(),
            generation,
            id,
        }
    }

    fn issue_id(&self) -> TransactionId {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return TransactionId(id);
            }
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now().saturating_duration_since(self.epoch).as_millis() as u64
    }
}

impl std::fmt::Debug for TransactionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("TransactionPool")
            .field("records", &stats.records)
            .field("busy", &stats.busy)
            .field("settings", &self.settings.load_full())
            .finish()
    }
}

/// Single-flight guard for garbage collection.
struct GcFlight<'a>(&'a AtomicBool);

impl<'a> GcFlight<'a> {
    fn enter(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for GcFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
