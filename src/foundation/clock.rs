use std::sync::OnceLock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

use crate::foundation::core::MediaTime;

/// Source of presentation timestamps for captured frames.
pub trait MediaClock: Send + Sync {
    fn now(&self) -> MediaTime;
}

/// Monotonic host clock, in microseconds since the first clock was created in this process.
///
/// All `HostClock` values share one epoch, so timestamps taken by different components compare.
#[derive(Clone, Copy, Debug, Default)]
pub struct HostClock;

impl HostClock {
    pub fn new() -> Self {
        let _ = epoch();
        Self
    }
}

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl MediaClock for HostClock {
    fn now(&self) -> MediaTime {
        let micros = epoch().elapsed().as_micros();
        MediaTime::from_micros(i64::try_from(micros).unwrap_or(i64::MAX))
    }
}

/// Hand-driven clock for deterministic tests and offline rendering.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn new(start: MediaTime) -> Self {
        Self {
            micros: AtomicI64::new(start.convert_scale(1_000_000).value),
        }
    }

    pub fn set(&self, t: MediaTime) {
        self.micros
            .store(t.convert_scale(1_000_000).value, Ordering::SeqCst);
    }

    pub fn advance(&self, by: MediaTime) {
        self.micros
            .fetch_add(by.convert_scale(1_000_000).value, Ordering::SeqCst);
    }
}

impl MediaClock for ManualClock {
    fn now(&self) -> MediaTime {
        MediaTime::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
