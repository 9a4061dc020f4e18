use crate::config::Configuration;
use crate::stage::{StageDimensions, TargetPlacement};
use affex_core::SessionPhase;
use affex_timing::{DriftCorrectedTimer, TimingStats, TimingSummary, Timestamp};
use rand::Rng;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Duration;
use tracing::{debug, info};

/// Follow-up cues the session schedules after a correct action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Cue {
    FeedbackShown,
    FeedbackHidden,
    TargetRemoved,
}

/// Timing events handed to the session controller.
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerEvent {
    TrialStarted { trial: u32 },
    TargetOnset { trial: u32, placement: TargetPlacement },
    TargetExpired { trial: u32 },
    Cue { trial: u32, cue: Cue },
    SessionEnded { timing: TimingSummary },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Pending {
    TargetOnset { trial: u32 },
    TargetExpired { trial: u32 },
    Cue { trial: u32, cue: Cue },
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Slot {
    due: Timestamp,
    seq: u64,
    what: Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrialTiming {
    pub trial_count: u32,
    pub trial_duration: Duration,
    pub onset_window: (Duration, Duration),
    pub target_visible: Duration,
    pub target_images: u32,
    pub stage: StageDimensions,
}

impl TrialTiming {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            trial_count: config.trial_count,
            trial_duration: config.trial_duration,
            onset_window: (config.target_onset, config.target_offset),
            target_visible: config.target_visible_duration,
            target_images: config.target_images,
            stage: config.stage,
        }
    }
}

/// Drift-corrected trial engine.
///
/// Trial boundaries are due at `start + k * trial_duration`; each one is
/// derived from the previous expected boundary, never from the time the
/// previous callback ran. Target onsets are drawn uniformly from the onset
/// window, relative to the expected trial start.
pub struct TrialScheduler<R: Rng> {
    timing: TrialTiming,
    rng: R,
    phase: SessionPhase,
    boundaries: Option<DriftCorrectedTimer>,
    remaining: Duration,
    agenda: BinaryHeap<Reverse<Slot>>,
    seq: u64,
    lateness: TimingStats,
}

impl<R: Rng> TrialScheduler<R> {
    pub fn new(timing: TrialTiming, rng: R) -> Self {
        Self {
            timing,
            rng,
            phase: SessionPhase::Idle,
            boundaries: None,
            remaining: Duration::ZERO,
            agenda: BinaryHeap::new(),
            seq: 0,
            lateness: TimingStats::new(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn current_trial(&self) -> Option<u32> {
        self.phase.trial()
    }

    /// Session time not yet covered by started trials.
    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    pub fn session_start(&self) -> Option<Timestamp> {
        self.boundaries.as_ref().map(|b| b.origin())
    }

    /// Expected end of the whole session.
    pub fn session_end(&self) -> Option<Timestamp> {
        self.session_start()
            .map(|s| s + self.timing.trial_duration * self.timing.trial_count)
    }

    /// Earliest pending deadline, if any.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        self.agenda.peek().map(|Reverse(slot)| slot.due)
    }

    pub fn timing_summary(&self) -> TimingSummary {
        self.lateness.summary()
    }

    fn push(&mut self, due: Timestamp, what: Pending) {
        self.seq += 1;
        self.agenda.push(Reverse(Slot {
            due,
            seq: self.seq,
            what,
        }));
    }

    /// `Idle -> Running(1)`. Calling it again is a no-op.
    pub fn start(&mut self, now: Timestamp) -> Vec<SchedulerEvent> {
        if self.phase != SessionPhase::Idle {
            return Vec::new();
        }
        self.boundaries = Some(DriftCorrectedTimer::new(now, self.timing.trial_duration));
        self.remaining = self.timing.trial_duration * self.timing.trial_count;
        info!(
            "Session of {} trials x {} ms started",
            self.timing.trial_count,
            self.timing.trial_duration.as_millis()
        );
        vec![self.enter_trial(1, now)]
    }

    fn enter_trial(&mut self, trial: u32, trial_start: Timestamp) -> SchedulerEvent {
        self.phase = SessionPhase::Running(trial);
        self.remaining = self.remaining.saturating_sub(self.timing.trial_duration);

        let (min, max) = self.timing.onset_window;
        let (lo, hi) = (min.as_nanos() as u64, max.as_nanos() as u64);
        let offset = if hi > lo {
            Duration::from_nanos(self.rng.random_range(lo..=hi))
        } else {
            min
        };
        // Onset is queued before the boundary so a tie resolves onset-first.
        self.push(trial_start + offset, Pending::TargetOnset { trial });
        if let Some(next) = self.boundaries.as_ref().map(|b| b.next_expected()) {
            self.push(next, Pending::Boundary);
        }
        debug!(trial, onset_ms = offset.as_millis() as u64, "Trial scheduled");
        SchedulerEvent::TrialStarted { trial }
    }

    /// Queues a cue for the current session; ignored once ended.
    pub fn schedule_cue(&mut self, due: Timestamp, trial: u32, cue: Cue) {
        if self.phase.is_running() {
            self.push(due, Pending::Cue { trial, cue });
        }
    }

    /// Fires everything due at or before `now`, in deadline order.
    pub fn advance(&mut self, now: Timestamp) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Some(Reverse(slot)) = self.agenda.peek().copied() {
            if slot.due > now || !self.phase.is_running() {
                break;
            }
            self.agenda.pop();
            let Some(trial) = self.phase.trial() else { break };

            match slot.what {
                Pending::TargetOnset { trial: t } if t == trial => {
                    let placement = self
                        .timing
                        .stage
                        .place_target(&mut self.rng, self.timing.target_images);
                    self.push(slot.due + self.timing.target_visible, Pending::TargetExpired { trial });
                    events.push(SchedulerEvent::TargetOnset { trial, placement });
                }
                Pending::TargetExpired { trial: t } if t == trial => {
                    events.push(SchedulerEvent::TargetExpired { trial });
                }
                Pending::TargetOnset { .. } | Pending::TargetExpired { .. } => {
                    // belongs to a trial that already ended
                }
                Pending::Cue { trial: t, cue } => {
                    events.push(SchedulerEvent::Cue { trial: t, cue });
                }
                Pending::Boundary => {
                    if let Some(timer) = self.boundaries.as_mut() {
                        let expected = timer.next_expected();
                        let late = timer.fire(now);
                        self.lateness.record(late);
                        if self.remaining.is_zero() {
                            events.push(self.end());
                        } else {
                            events.push(self.enter_trial(trial + 1, expected));
                        }
                    }
                }
            }
        }
        events
    }

    /// `-> Ended`, dropping every pending sub-event. Terminal.
    pub fn end(&mut self) -> SchedulerEvent {
        self.agenda.clear();
        self.phase = SessionPhase::Ended;
        let timing = self.lateness.summary();
        info!(
            "Session ended; boundary lateness avg {:.3} ms, jitter {:.3} ms",
            timing.average_ms, timing.jitter_ms
        );
        SchedulerEvent::SessionEnded { timing }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    /// Onsets early in the trial so that no other deadline sits just
    /// before a boundary.
    fn timing(trials: u32, duration_ms: u64) -> TrialTiming {
        TrialTiming {
            trial_count: trials,
            trial_duration: Duration::from_millis(duration_ms),
            onset_window: (
                Duration::from_millis(duration_ms / 5),
                Duration::from_millis(duration_ms * 3 / 10),
            ),
            target_visible: Duration::from_millis(duration_ms / 10),
            target_images: 8,
            stage: StageDimensions::default(),
        }
    }

    fn scheduler(trials: u32, duration_ms: u64) -> TrialScheduler<StdRng> {
        TrialScheduler::new(timing(trials, duration_ms), StdRng::seed_from_u64(11))
    }

    /// Drives the scheduler deadline by deadline, firing each one `delay` late.
    fn drive(s: &mut TrialScheduler<StdRng>, delay: Duration) -> Vec<(Timestamp, SchedulerEvent)> {
        let mut out = Vec::new();
        while let Some(due) = s.next_deadline() {
            let now = due + delay;
            for ev in s.advance(now) {
                out.push((now, ev));
            }
        }
        out
    }

    #[test]
    fn visits_every_trial_once_then_ends_on_time() {
        for (n, d) in [(1, 5000), (3, 5000), (10, 4000)] {
            let mut s = scheduler(n, d);
            let mut events: Vec<_> = s
                .start(Timestamp::ZERO)
                .into_iter()
                .map(|e| (Timestamp::ZERO, e))
                .collect();
            events.extend(drive(&mut s, Duration::ZERO));

            let trials: Vec<u32> = events
                .iter()
                .filter_map(|(_, e)| match e {
                    SchedulerEvent::TrialStarted { trial } => Some(*trial),
                    _ => None,
                })
                .collect();
            assert_eq!(trials, (1..=n).collect::<Vec<_>>());

            let (ended_at, last) = events.last().unwrap();
            assert!(matches!(last, SchedulerEvent::SessionEnded { .. }));
            assert_eq!(*ended_at, Timestamp::from_millis(n as u64 * d));
            assert!(s.phase().is_ended());
            assert_eq!(s.next_deadline(), None);
        }
    }

    #[test]
    fn trial_k_starts_on_the_grid() {
        let mut s = scheduler(4, 5000);
        s.start(Timestamp::ZERO);
        let events = drive(&mut s, Duration::ZERO);
        let starts: Vec<_> = events
            .iter()
            .filter(|(_, e)| matches!(e, SchedulerEvent::TrialStarted { .. }))
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(
            starts,
            vec![
                Timestamp::from_millis(5000),
                Timestamp::from_millis(10000),
                Timestamp::from_millis(15000),
            ]
        );
    }

    #[test]
    fn late_boundaries_do_not_accumulate_drift() {
        let mut s = scheduler(5, 1000);
        s.start(Timestamp::ZERO);

        // Every deadline is served 300 ms late, yet the end is only one
        // delay past the ideal 5 s.
        let events = drive(&mut s, Duration::from_millis(300));
        let (ended_at, _) = events.last().unwrap();
        assert_eq!(*ended_at, Timestamp::from_millis(5300));
        let summary = s.timing_summary();
        assert_eq!(summary.ticks, 5);
        assert!((summary.average_ms - 300.0).abs() < 1e-6);
    }

    #[test]
    fn a_single_stall_is_absorbed() {
        let mut s = scheduler(4, 1000);
        s.start(Timestamp::ZERO);
        // Stall until 2.5 s: boundaries 1 s and 2 s fire back to back.
        let burst = s.advance(Timestamp::from_millis(2500));
        let started: Vec<_> = burst
            .iter()
            .filter_map(|e| match e {
                SchedulerEvent::TrialStarted { trial } => Some(*trial),
                _ => None,
            })
            .collect();
        assert_eq!(started, vec![2, 3]);
        assert_eq!(s.phase(), SessionPhase::Running(3));
        // Next boundary stays at 3 s, not 3.5 s.
        let rest = drive(&mut s, Duration::ZERO);
        let boundary_times: Vec<_> = rest
            .iter()
            .filter(|(_, e)| {
                matches!(
                    e,
                    SchedulerEvent::TrialStarted { .. } | SchedulerEvent::SessionEnded { .. }
                )
            })
            .map(|(t, _)| *t)
            .collect();
        assert_eq!(
            boundary_times,
            vec![Timestamp::from_millis(3000), Timestamp::from_millis(4000)]
        );
    }

    #[test]
    fn onset_falls_inside_window_and_expires_after_visible_time() {
        let mut t = timing(50, 5000);
        t.onset_window = (Duration::from_millis(1000), Duration::from_millis(4000));
        t.target_visible = Duration::from_millis(1000);
        let mut s = TrialScheduler::new(t, StdRng::seed_from_u64(5));
        s.start(Timestamp::ZERO);
        let events = drive(&mut s, Duration::ZERO);
        let mut onsets = 0;
        let mut last_onset = None;
        for (t, e) in &events {
            match e {
                SchedulerEvent::TargetOnset { trial, .. } => {
                    let trial_start = Timestamp::from_millis((*trial as u64 - 1) * 5000);
                    let offset = *t - trial_start;
                    assert!(offset >= Duration::from_millis(1000) && offset <= Duration::from_millis(4000));
                    onsets += 1;
                    last_onset = Some((*trial, *t));
                }
                SchedulerEvent::TargetExpired { trial } => {
                    let (onset_trial, at) = last_onset.unwrap();
                    assert_eq!(onset_trial, *trial);
                    assert_eq!(*t - at, Duration::from_millis(1000));
                }
                _ => {}
            }
        }
        assert_eq!(onsets, 50);
    }

    #[test]
    fn expiry_past_the_boundary_is_dropped() {
        let mut t = timing(2, 1000);
        t.onset_window = (Duration::from_millis(800), Duration::from_millis(900));
        t.target_visible = Duration::from_millis(500);
        let mut s = TrialScheduler::new(t, StdRng::seed_from_u64(3));
        s.start(Timestamp::ZERO);
        let events = drive(&mut s, Duration::ZERO);
        assert!(!events
            .iter()
            .any(|(_, e)| matches!(e, SchedulerEvent::TargetExpired { .. })));
    }

    #[test]
    fn end_cancels_pending_cues_and_is_terminal() {
        let mut s = scheduler(3, 1000);
        s.start(Timestamp::ZERO);
        s.schedule_cue(Timestamp::from_millis(500), 1, Cue::FeedbackShown);
        assert!(matches!(s.end(), SchedulerEvent::SessionEnded { .. }));
        assert_eq!(s.next_deadline(), None);
        assert!(s.advance(Timestamp::from_millis(10_000)).is_empty());
        s.schedule_cue(Timestamp::from_millis(20_000), 1, Cue::FeedbackHidden);
        assert_eq!(s.next_deadline(), None);
        assert!(s.start(Timestamp::ZERO).is_empty());
        assert!(s.phase().is_ended());
    }

    #[test]
    fn cues_fire_even_across_a_boundary() {
        let mut s = scheduler(3, 1000);
        s.start(Timestamp::ZERO);
        s.schedule_cue(Timestamp::from_millis(1200), 1, Cue::FeedbackHidden);
        let events = s.advance(Timestamp::from_millis(1200));
        assert!(events.contains(&SchedulerEvent::Cue {
            trial: 1,
            cue: Cue::FeedbackHidden
        }));
    }
}
