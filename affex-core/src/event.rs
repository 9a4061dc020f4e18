use affex_timing::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Everything that can be written to the session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    SessionConfigured,
    SystemInfo,
    SensorWarmingUp,
    SensorReady,
    SessionStarted,
    TrialStarted,
    TargetAppeared,
    TargetDisappearedAutomatically,
    TargetDisappearedAfterCorrectAction,
    PageClick,
    ActionCorrect,
    ActionIncorrect,
    ActionRejected,
    ActionIgnored,
    FaceDetected,
    NoFaceDetected,
    SensorError,
    AverageHappy,
    TotalHappy,
    TotalFearful,
    FeedbackShown,
    FeedbackHidden,
    TimingSummary,
    SessionEnded,
}

impl EventKind {
    pub const ALL: [EventKind; 24] = [
        EventKind::SessionConfigured,
        EventKind::SystemInfo,
        EventKind::SensorWarmingUp,
        EventKind::SensorReady,
        EventKind::SessionStarted,
        EventKind::TrialStarted,
        EventKind::TargetAppeared,
        EventKind::TargetDisappearedAutomatically,
        EventKind::TargetDisappearedAfterCorrectAction,
        EventKind::PageClick,
        EventKind::ActionCorrect,
        EventKind::ActionIncorrect,
        EventKind::ActionRejected,
        EventKind::ActionIgnored,
        EventKind::FaceDetected,
        EventKind::NoFaceDetected,
        EventKind::SensorError,
        EventKind::AverageHappy,
        EventKind::TotalHappy,
        EventKind::TotalFearful,
        EventKind::FeedbackShown,
        EventKind::FeedbackHidden,
        EventKind::TimingSummary,
        EventKind::SessionEnded,
    ];

    /// Human-readable label used in the exported `Event` column.
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::SessionConfigured => "Session configured",
            EventKind::SystemInfo => "System info",
            EventKind::SensorWarmingUp => "Sensor warming up",
            EventKind::SensorReady => "Sensor ready",
            EventKind::SessionStarted => "Session started",
            EventKind::TrialStarted => "Trial started",
            EventKind::TargetAppeared => "Target appeared",
            EventKind::TargetDisappearedAutomatically => "Target disappeared automatically",
            EventKind::TargetDisappearedAfterCorrectAction => {
                "Target disappeared after correct action"
            }
            EventKind::PageClick => "Page click",
            EventKind::ActionCorrect => "Action correct",
            EventKind::ActionIncorrect => "Action incorrect",
            EventKind::ActionRejected => "Action rejected, target not shown",
            EventKind::ActionIgnored => "Action ignored, trial already scored",
            EventKind::FaceDetected => "Face detected",
            EventKind::NoFaceDetected => "No face detected",
            EventKind::SensorError => "Sensor error",
            EventKind::AverageHappy => "Average happy",
            EventKind::TotalHappy => "Total happy",
            EventKind::TotalFearful => "Total fearful",
            EventKind::FeedbackShown => "Feedback shown",
            EventKind::FeedbackHidden => "Feedback hidden",
            EventKind::TimingSummary => "Timing summary",
            EventKind::SessionEnded => "Session ended",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.label() == label)
    }

    /// Entries produced by the sensing loop rather than by the session.
    pub fn is_sensor(&self) -> bool {
        matches!(
            self,
            EventKind::FaceDetected | EventKind::NoFaceDetected | EventKind::SensorError
        )
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One immutable record of the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub kind: EventKind,
    pub metadata: Option<Value>,
}

impl LogEntry {
    /// Numeric field of a map payload, if present.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.as_ref()?.get(key)?.as_f64()
    }
}

/// Short console rendering of a payload; numbers are shown with two decimals.
pub fn describe_metadata(metadata: Option<&Value>) -> String {
    fn scalar(v: &Value) -> String {
        match v {
            Value::Number(n) => n
                .as_f64()
                .map(|x| format!("{:.2}", x))
                .unwrap_or_else(|| n.to_string()),
            Value::String(s) => s.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        }
    }
    match metadata {
        None => "null".to_string(),
        Some(Value::Object(map)) => map
            .iter()
            .flat_map(|(k, v)| [k.clone(), scalar(v)])
            .collect::<Vec<_>>()
            .join(", "),
        Some(v) => scalar(v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn labels_are_unique_and_reversible() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(EventKind::from_label("Unknown event"), None);
    }

    #[test]
    fn describes_maps_and_scalars() {
        let m = json!({"happy": 0.123, "neutral": 0.5});
        assert_eq!(describe_metadata(Some(&m)), "happy, 0.12, neutral, 0.50");
        assert_eq!(describe_metadata(Some(&json!(3))), "3.00");
        assert_eq!(describe_metadata(None), "null");
    }
}
