use crate::config::Configuration;
use crate::error::SensingError;
use affex_core::{DetectedFace, EventKind, SharedLog};
use affex_timing::Clock;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// The external face/expression sensing capability.
///
/// Each call analyses the current camera frame and returns one entry per
/// detected face. Zero faces is a normal result, not an error.
pub trait ExpressionDetector: Send + 'static {
    fn detect(&mut self) -> impl Future<Output = Result<Vec<DetectedFace>, SensingError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    /// Time between the starts of consecutive detections.
    pub interval: Duration,
    /// Longest wait for one detection before it counts as "no face".
    pub timeout: Duration,
    /// Log every face in a frame instead of only the first.
    pub log_all_faces: bool,
}

impl SamplerSettings {
    pub fn from_config(config: &Configuration) -> Self {
        Self {
            interval: config.sampling_interval,
            timeout: config.detection_timeout,
            log_all_faces: config.log_all_faces,
        }
    }
}

/// Outcome of one sensing call, before it is written to the log.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Faces(Vec<DetectedFace>),
    TimedOut,
    Failed(SensingError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SamplerReport {
    pub ticks: u64,
    pub faces: u64,
    pub no_faces: u64,
    pub timeouts: u64,
    pub errors: u64,
}

/// Drives the detector on its own cadence and appends one record per tick.
///
/// The next call is armed only after the previous one resolved, so calls
/// never overlap and the effective period is `max(interval, latency)`.
pub struct SignalSampler<D, C>
where
    D: ExpressionDetector,
    C: Clock,
{
    detector: D,
    log: SharedLog<C>,
    settings: SamplerSettings,
    report: SamplerReport,
}

impl<D, C> SignalSampler<D, C>
where
    D: ExpressionDetector,
    C: Clock,
{
    pub fn new(detector: D, log: SharedLog<C>, settings: SamplerSettings) -> Self {
        Self {
            detector,
            log,
            settings,
            report: SamplerReport::default(),
        }
    }

    pub fn report(&self) -> &SamplerReport {
        &self.report
    }

    async fn detect(&mut self) -> Detection {
        match tokio::time::timeout(self.settings.timeout, self.detector.detect()).await {
            Ok(Ok(faces)) => Detection::Faces(faces),
            Ok(Err(e)) => Detection::Failed(e),
            Err(_) => Detection::TimedOut,
        }
    }

    /// Writes one detection outcome to the log.
    pub fn record(&mut self, detection: Detection) {
        self.report.ticks += 1;
        match detection {
            Detection::Faces(faces) if faces.is_empty() => {
                self.report.no_faces += 1;
                self.log.append(EventKind::NoFaceDetected, None);
            }
            Detection::Faces(faces) => {
                self.report.faces += 1;
                let keep = if self.settings.log_all_faces { faces.len() } else { 1 };
                for face in faces.iter().take(keep) {
                    self.log
                        .append(EventKind::FaceDetected, Some(face.expressions.to_metadata()));
                }
            }
            Detection::TimedOut => {
                self.report.timeouts += 1;
                warn!(
                    "Detection exceeded {} ms, treating as no face",
                    self.settings.timeout.as_millis()
                );
                self.log.append(EventKind::NoFaceDetected, None);
            }
            Detection::Failed(e) => {
                self.report.errors += 1;
                warn!("Detection failed, treating as no face: {e}");
                self.log
                    .append(EventKind::SensorError, Some(json!({ "message": e.to_string() })));
            }
        }
    }

    /// One detection before the session, to surface an unusable sensor early.
    pub async fn warm_up(&mut self) -> Result<(), SensingError> {
        self.log.append(EventKind::SensorWarmingUp, None);
        match self.detect().await {
            Detection::Failed(e) => Err(SensingError::Unavailable(e.to_string())),
            Detection::TimedOut => Err(SensingError::Unavailable(format!(
                "no response within {} ms",
                self.settings.timeout.as_millis()
            ))),
            ok => {
                self.record(ok);
                self.log.append(EventKind::SensorReady, None);
                Ok(())
            }
        }
    }

    /// Samples until `token` is cancelled. A detection that resolves after
    /// cancellation is discarded.
    pub async fn run(mut self, token: CancellationToken) -> SamplerReport {
        loop {
            let started = Instant::now();
            let detection = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                d = self.detect() => d,
            };
            if token.is_cancelled() {
                break;
            }
            self.record(detection);

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep_until(started + self.settings.interval) => {}
            }
        }
        debug!(report = ?self.report, "Sampler stopped");
        self.report
    }

    pub fn spawn(self, token: CancellationToken) -> JoinHandle<SamplerReport> {
        tokio::spawn(self.run(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affex_core::{EventLog, ExpressionSample};
    use affex_timing::{SessionClock, Timestamp};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;

    /// Replays canned results, each after a fixed latency.
    struct Scripted {
        latency: Duration,
        script: VecDeque<Result<Vec<DetectedFace>, SensingError>>,
    }

    impl ExpressionDetector for Scripted {
        async fn detect(&mut self) -> Result<Vec<DetectedFace>, SensingError> {
            tokio::time::sleep(self.latency).await;
            self.script.pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn face(happy: f64) -> DetectedFace {
        DetectedFace::new(ExpressionSample::new().with("happy", happy))
    }

    fn settings(interval_ms: u64) -> SamplerSettings {
        SamplerSettings {
            interval: Duration::from_millis(interval_ms),
            timeout: Duration::from_millis(500),
            log_all_faces: false,
        }
    }

    fn shared() -> SharedLog<SessionClock> {
        SharedLog::new(EventLog::new(SessionClock::new()))
    }

    async fn stamps_over(latency_ms: u64, interval_ms: u64, run_ms: u64) -> Vec<Timestamp> {
        let log = shared();
        let detector = Scripted {
            latency: Duration::from_millis(latency_ms),
            script: VecDeque::new(),
        };
        let token = CancellationToken::new();
        let handle =
            SignalSampler::new(detector, log.clone(), settings(interval_ms)).spawn(token.clone());

        tokio::time::sleep(Duration::from_millis(run_ms)).await;
        token.cancel();
        handle.await.unwrap();
        log.snapshot().iter().map(|e| e.timestamp).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fast_detector_keeps_the_interval() {
        let stamps = stamps_over(40, 100, 520).await;
        assert_eq!(
            stamps,
            [40, 140, 240, 340, 440].map(Timestamp::from_millis).to_vec()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_detector_sets_the_pace_without_overlap() {
        let stamps = stamps_over(150, 100, 520).await;
        assert_eq!(stamps, [150, 300, 450].map(Timestamp::from_millis).to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn first_face_only_unless_multi_face_logging() {
        let log = shared();
        let mut sampler = SignalSampler::new(
            Scripted {
                latency: Duration::ZERO,
                script: VecDeque::new(),
            },
            log.clone(),
            settings(100),
        );
        sampler.record(Detection::Faces(vec![face(0.7), face(0.1)]));
        assert_eq!(log.len(), 1);

        let mut all = settings(100);
        all.log_all_faces = true;
        let mut sampler = SignalSampler::new(
            Scripted {
                latency: Duration::ZERO,
                script: VecDeque::new(),
            },
            log.clone(),
            all,
        );
        sampler.record(Detection::Faces(vec![face(0.7), face(0.1)]));
        let entries = log.snapshot();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.kind == EventKind::FaceDetected));
        assert_eq!(entries[2].metadata_f64("happy"), Some(0.1));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_detection_counts_as_no_face() {
        let log = shared();
        let mut sampler = SignalSampler::new(
            Scripted {
                latency: Duration::from_secs(10),
                script: VecDeque::from([Ok(vec![face(1.0)])]),
            },
            log.clone(),
            settings(100),
        );
        let d = sampler.detect().await;
        assert_eq!(d, Detection::TimedOut);
        sampler.record(d);
        assert_eq!(log.snapshot()[0].kind, EventKind::NoFaceDetected);
        assert_eq!(log.snapshot()[0].timestamp, Timestamp::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn in_session_error_degrades_to_no_detection() {
        let log = shared();
        let mut sampler = SignalSampler::new(
            Scripted {
                latency: Duration::ZERO,
                script: VecDeque::from([Err(SensingError::Failed("frame dropped".into()))]),
            },
            log.clone(),
            settings(100),
        );
        let d = sampler.detect().await;
        sampler.record(d);
        let entry = &log.snapshot()[0];
        assert_eq!(entry.kind, EventKind::SensorError);
        assert_eq!(sampler.report().errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn warm_up_failure_is_fatal() {
        let log = shared();
        let mut sampler = SignalSampler::new(
            Scripted {
                latency: Duration::ZERO,
                script: VecDeque::from([Err(SensingError::Unavailable("permission denied".into()))]),
            },
            log.clone(),
            settings(100),
        );
        let err = sampler.warm_up().await.unwrap_err();
        assert!(matches!(err, SensingError::Unavailable(_)));
        assert_eq!(log.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn late_result_after_cancel_is_discarded() {
        let log = shared();
        let token = CancellationToken::new();
        let detector = Scripted {
            latency: Duration::from_millis(300),
            script: VecDeque::from([Ok(vec![face(1.0)])]),
        };
        let handle = SignalSampler::new(detector, log.clone(), settings(100)).spawn(token.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(log.is_empty());
    }
}
