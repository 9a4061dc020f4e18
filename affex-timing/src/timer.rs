use crate::clock::{duration_nanos, Clock, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Repeating deadline anchored to an absolute origin.
///
/// The k-th tick is due at `origin + k * interval` no matter when the
/// previous tick actually ran, so one slow tick never shifts the ones after
/// it. Missed ticks are not fired in bulk: each call to [`fire`] consumes
/// exactly one deadline.
///
/// [`fire`]: DriftCorrectedTimer::fire
#[derive(Debug, Clone)]
pub struct DriftCorrectedTimer {
    origin: Timestamp,
    interval_ns: u64,
    fired: u64,
}

impl DriftCorrectedTimer {
    pub fn new(origin: Timestamp, interval: Duration) -> Self {
        Self {
            origin,
            interval_ns: duration_nanos(interval).max(1),
            fired: 0,
        }
    }

    pub fn origin(&self) -> Timestamp {
        self.origin
    }

    pub fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_ns)
    }

    /// Number of deadlines consumed so far.
    pub fn fired(&self) -> u64 {
        self.fired
    }

    /// Deadline of the next tick: last expected instant plus one interval.
    pub fn next_expected(&self) -> Timestamp {
        let offset = self.interval_ns.saturating_mul(self.fired + 1);
        Timestamp::from_nanos(self.origin.as_nanos().saturating_add(offset))
    }

    /// How long to sleep from `now`, never negative.
    pub fn delay_until_next(&self, now: Timestamp) -> Duration {
        self.next_expected().duration_since(now)
    }

    /// Consumes the pending deadline and reports how late `now` is against it.
    pub fn fire(&mut self, now: Timestamp) -> Duration {
        let lateness = now.duration_since(self.next_expected());
        self.fired += 1;
        lateness
    }

    /// Sleeps until the next deadline, then consumes it.
    pub async fn tick<C: Clock>(&mut self, clock: &C) -> Duration {
        tokio::time::sleep_until(clock.instant_at(self.next_expected())).await;
        self.fire(clock.now())
    }
}

/// Runs `on_tick` at every deadline of `timer` until `token` is cancelled.
///
/// A tick whose sleep completes after cancellation is dropped, because
/// cancelling does not unqueue a wake-up that is already pending.
pub async fn run_repeating<C, F>(
    mut timer: DriftCorrectedTimer,
    clock: C,
    token: CancellationToken,
    mut on_tick: F,
) where
    C: Clock,
    F: FnMut(u64, Duration),
{
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            lateness = timer.tick(&clock) => {
                if token.is_cancelled() {
                    break;
                }
                on_tick(timer.fired(), lateness);
            }
        }
    }
}

/// Bounded history of tick lateness.
#[derive(Debug, Clone)]
pub struct TimingStats {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub ticks: usize,
    pub average_ms: f64,
    pub jitter_ms: f64, // standard deviation
    pub min_ms: f64,
    pub max_ms: f64,
}

impl TimingStats {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples.min(1024)),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, lateness: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(lateness);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn summary(&self) -> TimingSummary {
        if self.samples.is_empty() {
            return TimingSummary::default();
        }
        let times: Vec<f64> = self
            .samples
            .iter()
            .map(|d| d.as_nanos() as f64 / 1_000_000.0)
            .collect();
        let n = times.len() as f64;
        let avg = times.iter().sum::<f64>() / n;
        let var = times.iter().map(|x| (x - avg).powi(2)).sum::<f64>() / n;
        let min = times.iter().copied().fold(f64::INFINITY, f64::min);
        let max = times.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        TimingSummary {
            ticks: times.len(),
            average_ms: avg,
            jitter_ms: var.sqrt(),
            min_ms: min,
            max_ms: max,
        }
    }
}

impl Default for TimingStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Remaining time rendered as `MM:SS` for the countdown display.
pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}
