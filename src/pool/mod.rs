//! Transaction pool.
//!
//! # Data Flow
//! ```text
//! Receive ──acquire(None, create)──▶ [slot: id=N, record]
//!    │ inject id header
//!    ▼
//! BackendFetch/BackendResponse/Deliver ──acquire(Some(N))──▶ same slot
//!    │
//!    ▼
//! release(phase) ──second of BackendResponse/Deliver──▶ slot idle, reusable
//! ```
//!
//! # Design Decisions
//! - Records are reused, never freed, so steady-state traffic allocates
//!   nothing for bookkeeping
//! - Ids are issued from a counter and never repeat within a process
//! - Abandoned transactions (cache hits, dropped clients) are reclaimed by a
//!   sampled, single-flight garbage collection over idle time

pub mod clock;
pub mod record;
pub mod registry;

pub use clock::{Clock, FixedSampler, ManualClock, RandomSampler, Sampler, SystemClock};
pub use record::{FetchSettings, FetchTarget, TransactionId, TransactionRecord};
pub use registry::{PoolError, PoolSettings, PoolStats, TransactionHandle, TransactionPool};
