use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const HAPPY: &str = "happy";
pub const FEARFUL: &str = "fearful";

/// Labels produced by the expression model, in its output order.
pub const STANDARD_LABELS: [&str; 7] = [
    "neutral",
    "happy",
    "sad",
    "angry",
    "fearful",
    "disgusted",
    "surprised",
];

/// Expression label to confidence in `[0, 1]` for one detected face.
///
/// Labels keep the order the detector reported them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExpressionSample(Map<String, Value>);

impl ExpressionSample {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a confidence, clamped into `[0, 1]`. Non-finite values are dropped.
    pub fn insert(&mut self, label: impl Into<String>, confidence: f64) {
        if confidence.is_finite() {
            self.0.insert(label.into(), Value::from(confidence.clamp(0.0, 1.0)));
        }
    }

    pub fn with(mut self, label: impl Into<String>, confidence: f64) -> Self {
        self.insert(label, confidence);
        self
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.0.get(label).and_then(Value::as_f64)
    }

    pub fn happy(&self) -> f64 {
        self.get(HAPPY).unwrap_or(0.0)
    }

    pub fn fearful(&self) -> f64 {
        self.get(FEARFUL).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0
            .iter()
            .filter_map(|(k, v)| Some((k.as_str(), v.as_f64()?)))
    }

    pub fn to_metadata(&self) -> Value {
        Value::Object(self.0.clone())
    }

    /// Reads a sample back out of a log payload; non-numeric fields are skipped.
    pub fn from_metadata(value: &Value) -> Option<Self> {
        let map = value.as_object()?;
        let mut sample = Self::new();
        for (k, v) in map {
            if let Some(x) = v.as_f64() {
                sample.insert(k.clone(), x);
            }
        }
        Some(sample)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ExpressionSample {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut sample = Self::new();
        for (k, v) in iter {
            sample.insert(k, v);
        }
        sample
    }
}

/// One face returned by the sensing capability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub expressions: ExpressionSample,
}

impl DetectedFace {
    pub fn new(expressions: ExpressionSample) -> Self {
        Self { expressions }
    }
}
