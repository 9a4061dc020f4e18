use crate::config::Configuration;
use crate::error::{SensingError, SessionError};
use crate::evaluator::WindowedEvaluator;
use crate::export::ExportSink;
use crate::sampler::{ExpressionDetector, SamplerReport, SamplerSettings, SignalSampler};
use crate::scheduler::{Cue, SchedulerEvent, TrialScheduler, TrialTiming};
use affex_core::{EchoPolicy, EventKind, EventLog, SessionPhase, SharedLog, TrialResult, TrialState};
use affex_timing::{format_countdown, run_repeating, Clock, DriftCorrectedTimer, Timestamp, TimingSummary};
use rand::Rng;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One input from the participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantAction {
    /// Click on the agent, the element carrying the target.
    Target,
    /// Click anywhere else on the page.
    Page(String),
}

impl ParticipantAction {
    pub fn element(&self) -> &str {
        match self {
            ParticipantAction::Target => "agent",
            ParticipantAction::Page(element) => element,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// Logged for audit only: not a target click, or no trial running.
    Unscored,
    Rejected,
    Ignored,
    Correct,
    Incorrect,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionReport {
    pub trials: Vec<TrialResult>,
    pub sampler: SamplerReport,
    pub timing: TimingSummary,
}

impl SessionReport {
    pub fn correct(&self) -> usize {
        self.trials.iter().filter(|t| t.correct).count()
    }
}

/// Owns the whole session: log, scheduler, evaluator and the sampling task.
pub struct SessionController<D, C, R>
where
    D: ExpressionDetector,
    C: Clock,
    R: Rng,
{
    config: Configuration,
    clock: C,
    log: SharedLog<C>,
    evaluator: WindowedEvaluator,
    scheduler: TrialScheduler<R>,
    sampler: Option<SignalSampler<D, C>>,
    ready: bool,
    /// Stops the sampler and the countdown.
    tasks: CancellationToken,
    sampler_task: Option<JoinHandle<SamplerReport>>,
    sampler_report: SamplerReport,
    trial: Option<TrialState>,
    results: Vec<TrialResult>,
}

impl<D, C, R> SessionController<D, C, R>
where
    D: ExpressionDetector,
    C: Clock,
    R: Rng,
{
    pub fn new(config: Configuration, detector: D, clock: C, rng: R) -> Self {
        let echo = EchoPolicy {
            sensor_positives: config.show_video,
            sensor_negatives: config.log_sensor_negatives,
        };
        let log = SharedLog::new(EventLog::new(clock.clone()).with_echo(echo));
        log.append(EventKind::SessionConfigured, Some(config.to_metadata()));
        log.append(EventKind::SystemInfo, Some(system_info()));

        let sampler = SignalSampler::new(detector, log.clone(), SamplerSettings::from_config(&config));
        Self {
            evaluator: WindowedEvaluator::from_config(&config),
            scheduler: TrialScheduler::new(TrialTiming::from_config(&config), rng),
            sampler: Some(sampler),
            ready: false,
            tasks: CancellationToken::new(),
            sampler_task: None,
            sampler_report: SamplerReport::default(),
            trial: None,
            results: Vec::new(),
            config,
            clock,
            log,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn log(&self) -> &SharedLog<C> {
        &self.log
    }

    pub fn phase(&self) -> SessionPhase {
        self.scheduler.phase()
    }

    pub fn current_trial(&self) -> Option<&TrialState> {
        self.trial.as_ref()
    }

    pub fn results(&self) -> &[TrialResult] {
        &self.results
    }

    /// Runs the warm-up detection; the session cannot start without it.
    pub async fn prepare(&mut self) -> Result<(), SessionError> {
        let Some(sampler) = self.sampler.as_mut() else {
            return Err(SessionError::AlreadyStarted);
        };
        sampler
            .warm_up()
            .await
            .map_err(SessionError::SensorUnavailable)?;
        self.ready = true;
        Ok(())
    }

    /// Starts trial 1 and the sampling task.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.scheduler.phase() != SessionPhase::Idle {
            return Err(SessionError::AlreadyStarted);
        }
        if !self.ready {
            return Err(SessionError::SensorUnavailable(SensingError::Unavailable(
                "sensor has not completed its warm-up".into(),
            )));
        }
        let sampler = self.sampler.take().ok_or(SessionError::AlreadyStarted)?;

        let now = self.log.append(EventKind::SessionStarted, None);
        for event in self.scheduler.start(now) {
            self.on_trial_event(event);
        }
        self.sampler_task = Some(sampler.spawn(self.tasks.clone()));
        self.spawn_countdown(now);
        Ok(())
    }

    /// Once-per-second remaining-time display, as a diagnostic only.
    fn spawn_countdown(&self, origin: Timestamp) {
        let total = self.config.session_duration();
        let timer = DriftCorrectedTimer::new(origin, Duration::from_secs(1));
        tokio::spawn(run_repeating(
            timer,
            self.clock.clone(),
            self.tasks.clone(),
            move |seconds, _| {
                let left = total.saturating_sub(Duration::from_secs(seconds));
                debug!("Time remaining {}", format_countdown(left));
            },
        ));
    }

    /// Logs the input, then scores it if it is a target click during a trial.
    pub fn handle_action(&mut self, action: &ParticipantAction) -> ActionOutcome {
        self.log
            .append(EventKind::PageClick, Some(json!({ "element": action.element() })));
        if *action != ParticipantAction::Target || !self.scheduler.phase().allows_scoring() {
            return ActionOutcome::Unscored;
        }
        let Some(trial) = self.trial.as_mut() else {
            return ActionOutcome::Unscored;
        };
        let index = trial.index;

        if !trial.target_visible {
            self.log.append(EventKind::ActionRejected, Some(json!(index)));
            return ActionOutcome::Rejected;
        }
        if trial.action_taken {
            self.log.append(EventKind::ActionIgnored, Some(json!(index)));
            return ActionOutcome::Ignored;
        }

        let now = self.clock.now();
        let verdict = self.log.with(|log| self.evaluator.evaluate(log, now));
        if verdict.passed {
            trial.action_taken = true;
            self.log.append(EventKind::ActionCorrect, Some(json!(index)));
            self.scheduler.schedule_cue(
                now + self.config.target_disappear_duration,
                index,
                Cue::TargetRemoved,
            );
            self.scheduler
                .schedule_cue(now + self.config.feedback_delay, index, Cue::FeedbackShown);
            info!(trial = index, samples = verdict.evidence.samples, "Action correct");
            ActionOutcome::Correct
        } else {
            trial.incorrect_actions += 1;
            self.log.append(EventKind::ActionIncorrect, Some(json!(index)));
            debug!(trial = index, samples = verdict.evidence.samples, "Action incorrect");
            ActionOutcome::Incorrect
        }
    }

    /// Drives the session to its end, scoring `inputs` as they arrive.
    /// Starts the session first if that has not happened yet.
    pub async fn run_until_ended(
        &mut self,
        inputs: &mut mpsc::Receiver<ParticipantAction>,
    ) -> Result<SessionReport, SessionError> {
        if self.scheduler.phase() == SessionPhase::Idle {
            self.start()?;
        }
        let clock = self.clock.clone();
        while !self.scheduler.phase().is_ended() {
            let Some(due) = self.scheduler.next_deadline() else {
                let event = self.scheduler.end();
                self.apply(event).await;
                break;
            };
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(clock.instant_at(due)) => {
                    let now = clock.now();
                    for event in self.scheduler.advance(now) {
                        self.apply(event).await;
                    }
                }
                Some(action) = inputs.recv() => {
                    self.handle_action(&action);
                }
            }
        }
        Ok(self.report())
    }

    /// Ends the session immediately, as if the last boundary had passed.
    pub async fn stop(&mut self) {
        if self.scheduler.phase().is_running() {
            let event = self.scheduler.end();
            self.apply(event).await;
        }
    }

    pub fn report(&self) -> SessionReport {
        SessionReport {
            trials: self.results.clone(),
            sampler: self.sampler_report.clone(),
            timing: self.scheduler.timing_summary(),
        }
    }

    /// Full log as CSV, available once the session has ended.
    pub fn csv(&self) -> Result<String, SessionError> {
        if !self.scheduler.phase().is_ended() {
            return Err(SessionError::NotEnded);
        }
        Ok(self.log.to_csv()?)
    }

    pub fn export<S: ExportSink>(&self, sink: &S) -> Result<PathBuf, SessionError> {
        let csv = self.csv()?;
        Ok(sink.deliver(&self.config.export_filename(), &csv)?)
    }

    async fn apply(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::SessionEnded { timing } => self.finish(timing).await,
            other => self.on_trial_event(other),
        }
    }

    fn on_trial_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::TrialStarted { trial } => {
                self.fold_trial();
                self.trial = Some(TrialState::new(trial));
                self.log.append(EventKind::TrialStarted, Some(json!(trial)));
            }
            SchedulerEvent::TargetOnset { trial, placement } => {
                if let Some(state) = self.trial.as_mut().filter(|s| s.index == trial) {
                    state.target_visible = true;
                    state.target_shown = true;
                    self.log
                        .append(EventKind::TargetAppeared, Some(placement.to_metadata()));
                }
            }
            SchedulerEvent::TargetExpired { trial } => {
                if let Some(state) = self.trial.as_mut().filter(|s| s.index == trial) {
                    if state.target_visible && !state.action_taken {
                        state.target_visible = false;
                        self.log
                            .append(EventKind::TargetDisappearedAutomatically, Some(json!(trial)));
                    }
                }
            }
            SchedulerEvent::Cue { trial, cue } => self.on_cue(trial, cue),
            SchedulerEvent::SessionEnded { .. } => {}
        }
    }

    fn on_cue(&mut self, trial: u32, cue: Cue) {
        match cue {
            Cue::TargetRemoved => {
                if let Some(state) = self.trial.as_mut().filter(|s| s.index == trial) {
                    if state.target_visible {
                        state.target_visible = false;
                        self.log.append(
                            EventKind::TargetDisappearedAfterCorrectAction,
                            Some(json!(trial)),
                        );
                    }
                }
            }
            Cue::FeedbackShown => {
                let now = self.log.append(EventKind::FeedbackShown, Some(json!(trial)));
                self.scheduler.schedule_cue(
                    now + self.config.feedback_duration,
                    trial,
                    Cue::FeedbackHidden,
                );
            }
            Cue::FeedbackHidden => {
                self.log.append(EventKind::FeedbackHidden, Some(json!(trial)));
            }
        }
    }

    /// Closes the live trial; a target still on screen is hidden here.
    fn fold_trial(&mut self) {
        let Some(mut state) = self.trial.take() else {
            return;
        };
        if state.target_visible {
            state.target_visible = false;
            let kind = if state.action_taken {
                EventKind::TargetDisappearedAfterCorrectAction
            } else {
                EventKind::TargetDisappearedAutomatically
            };
            self.log.append(kind, Some(json!(state.index)));
        }
        self.results.push(state.into_result());
    }

    async fn finish(&mut self, timing: TimingSummary) {
        self.fold_trial();
        self.tasks.cancel();
        if let Some(task) = self.sampler_task.take() {
            match task.await {
                Ok(report) => self.sampler_report = report,
                Err(e) => warn!("Sampling task did not finish cleanly: {e}"),
            }
        }
        self.log.append(
            EventKind::TimingSummary,
            Some(json!({
                "ticks": timing.ticks,
                "average_ms": timing.average_ms,
                "jitter_ms": timing.jitter_ms,
                "min_ms": timing.min_ms,
                "max_ms": timing.max_ms,
            })),
        );
        self.log.append(EventKind::SessionEnded, None);
        info!(
            "Session ended: {}/{} trials correct",
            self.results.iter().filter(|t| t.correct).count(),
            self.results.len()
        );
    }
}

impl<D, C, R> Drop for SessionController<D, C, R>
where
    D: ExpressionDetector,
    C: Clock,
    R: Rng,
{
    fn drop(&mut self) {
        self.tasks.cancel();
    }
}

fn system_info() -> serde_json::Value {
    json!({
        "os": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "cpus": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        "version": env!("CARGO_PKG_VERSION"),
    })
}
