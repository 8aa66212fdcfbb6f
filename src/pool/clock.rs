//! Time and randomness sources for the pool, injectable for tests.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::Rng;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().expect("clock mutex poisoned")
    }
}

/// Decides whether an opportunistic garbage collection runs.
pub trait Sampler: Send + Sync {
    fn sample(&self, rate: f64) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        rand::thread_rng().gen_bool(rate.min(1.0))
    }
}

/// Always or never samples.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub bool);

impl Sampler for FixedSampler {
    fn sample(&self, _rate: f64) -> bool {
        self.0
    }
}
