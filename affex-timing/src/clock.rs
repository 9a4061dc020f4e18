use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Nanoseconds elapsed since the session clock was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(ns: u64) -> Self {
        Self(ns)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms.saturating_mul(1_000_000))
    }

    pub fn as_nanos(&self) -> u64 {
        self.0
    }

    pub fn as_millis_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Clamps at zero instead of underflowing.
    pub fn saturating_sub(self, d: Duration) -> Timestamp {
        Timestamp(self.0.saturating_sub(duration_nanos(d)))
    }

    /// Time from `earlier` to `self`, zero if `earlier` is later.
    pub fn duration_since(self, earlier: Timestamp) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;
    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(duration_nanos(rhs)))
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;
    fn sub(self, rhs: Timestamp) -> Duration {
        self.duration_since(rhs)
    }
}

pub(crate) fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Source of session time shared by the log, the scheduler and the sampler.
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Timestamp;
    /// Wall-clock instant corresponding to a session timestamp.
    fn wall_time(&self, ts: Timestamp) -> DateTime<Utc>;
    /// Runtime instant to sleep until in order to wake at `ts`.
    fn instant_at(&self, ts: Timestamp) -> Instant;

    fn elapsed(&self, ts: Timestamp) -> Duration {
        self.now().duration_since(ts)
    }
}

/// Monotonic session clock anchored to the wall clock at creation.
///
/// Built on the tokio instant so that paused runtimes drive it in tests.
#[derive(Debug, Clone)]
pub struct SessionClock {
    start: Instant,
    wall_start: DateTime<Utc>,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            wall_start: Utc::now(),
        }
    }

    pub fn wall_start(&self) -> DateTime<Utc> {
        self.wall_start
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SessionClock {
    fn now(&self) -> Timestamp {
        Timestamp(duration_nanos(self.start.elapsed()))
    }

    fn wall_time(&self, ts: Timestamp) -> DateTime<Utc> {
        let offset = chrono::Duration::nanoseconds(i64::try_from(ts.0).unwrap_or(i64::MAX));
        self.wall_start + offset
    }

    fn instant_at(&self, ts: Timestamp) -> Instant {
        self.start + ts.as_duration()
    }
}

/// Hand-driven clock for deterministic tests of log and scheduling logic.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ns: Arc<AtomicU64>,
    start: Instant,
    wall_start: DateTime<Utc>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now_ns: Arc::new(AtomicU64::new(0)),
            start: Instant::now(),
            wall_start: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    pub fn advance(&self, d: Duration) {
        self.now_ns.fetch_add(duration_nanos(d), Ordering::SeqCst);
    }

    pub fn set(&self, ts: Timestamp) {
        self.now_ns.store(ts.0, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.now_ns.load(Ordering::SeqCst))
    }

    fn wall_time(&self, ts: Timestamp) -> DateTime<Utc> {
        self.wall_start + chrono::Duration::nanoseconds(i64::try_from(ts.0).unwrap_or(i64::MAX))
    }

    fn instant_at(&self, ts: Timestamp) -> Instant {
        self.start + ts.as_duration()
    }
}
