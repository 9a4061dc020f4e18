use crate::config::{Configuration, EvaluationPolicy};
use affex_core::expression::{FEARFUL, HAPPY};
use affex_core::{EventKind, EventLog};
use affex_timing::{Clock, Timestamp};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

/// Aggregates of the face detections that fell inside the window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evidence {
    pub samples: usize,
    pub average_happy: Option<f64>,
    pub total_happy: Option<f64>,
    pub total_fearful: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub evidence: Evidence,
}

/// Decides whether the sensed affect signal counts at the moment of an action.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedEvaluator {
    pub policy: EvaluationPolicy,
    pub window: Duration,
    pub threshold: f64,
}

impl WindowedEvaluator {
    pub fn new(policy: EvaluationPolicy, window: Duration, threshold: f64) -> Self {
        Self {
            policy,
            window,
            threshold,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(
            config.evaluation_policy,
            config.evaluation_window,
            config.threshold,
        )
    }

    /// Reduces `FaceDetected` entries in `[now - window, now]` to a verdict
    /// without touching the log. No evidence is never a pass.
    pub fn assess<C: Clock>(&self, log: &EventLog<C>, now: Timestamp) -> Verdict {
        let from = now.saturating_sub(self.window);
        let (mut n, mut happy, mut fearful) = (0usize, 0.0f64, 0.0f64);
        for entry in log.window(EventKind::FaceDetected, from, now) {
            n += 1;
            happy += entry.metadata_f64(HAPPY).unwrap_or(0.0);
            fearful += entry.metadata_f64(FEARFUL).unwrap_or(0.0);
        }

        if n == 0 {
            return Verdict {
                passed: false,
                evidence: Evidence::default(),
            };
        }

        let average = happy / n as f64;
        let passed = match self.policy {
            EvaluationPolicy::Percent => average >= self.threshold,
            EvaluationPolicy::Ratio => happy > fearful,
        };
        Verdict {
            passed,
            evidence: Evidence {
                samples: n,
                average_happy: Some(average),
                total_happy: Some(happy),
                total_fearful: Some(fearful),
            },
        }
    }

    /// Like [`assess`](Self::assess), and also records the aggregates (or
    /// nulls) so every scored action can be audited later.
    pub fn evaluate<C: Clock>(&self, log: &mut EventLog<C>, now: Timestamp) -> Verdict {
        let verdict = self.assess(log, now);
        let e = &verdict.evidence;
        log.append(EventKind::AverageHappy, Some(opt(e.average_happy)));
        log.append(EventKind::TotalHappy, Some(opt(e.total_happy)));
        log.append(EventKind::TotalFearful, Some(opt(e.total_fearful)));
        verdict
    }
}

fn opt(v: Option<f64>) -> Value {
    v.map(Value::from).unwrap_or(Value::Null)
}
