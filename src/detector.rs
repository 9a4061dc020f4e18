use affex_core::export::read_records;
use affex_core::expression::{HAPPY, STANDARD_LABELS};
use affex_core::{DetectedFace, ExportError, ExpressionSample};
use affex_experiment::{ExpressionDetector, SensingError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Stand-in camera: one face per frame, happiness scattered around a bias.
pub struct SyntheticDetector {
    rng: StdRng,
    happy: f64,
    latency: Duration,
    absent: f64,
}

impl SyntheticDetector {
    pub fn new(seed: u64, happy: f64, latency: Duration) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            happy: happy.clamp(0.0, 1.0),
            latency,
            absent: 0.1,
        }
    }

    /// Share of frames in which no face is found.
    pub fn with_absence(mut self, rate: f64) -> Self {
        self.absent = rate.clamp(0.0, 1.0);
        self
    }

    fn sample(&mut self) -> ExpressionSample {
        let happy = (self.happy + self.rng.random_range(-0.2..=0.2)).clamp(0.0, 1.0);
        let others: Vec<&str> = STANDARD_LABELS.iter().copied().filter(|l| *l != HAPPY).collect();
        let weights: Vec<f64> = others.iter().map(|_| self.rng.random::<f64>()).collect();
        let total = weights.iter().sum::<f64>().max(f64::EPSILON);

        let mut sample = ExpressionSample::new().with(HAPPY, happy);
        for (label, w) in others.into_iter().zip(weights) {
            sample.insert(label, (1.0 - happy) * w / total);
        }
        sample
    }
}

impl ExpressionDetector for SyntheticDetector {
    async fn detect(&mut self) -> Result<Vec<DetectedFace>, SensingError> {
        let spread = self.latency.as_millis() as u64 / 2;
        let delay = self.latency + Duration::from_millis(self.rng.random_range(0..=spread));
        tokio::time::sleep(delay).await;

        if self.rng.random_bool(self.absent) {
            return Ok(Vec::new());
        }
        Ok(vec![DetectedFace::new(self.sample())])
    }
}

/// Replays expression rows recorded by a face-analysis tool, looping at the end.
///
/// The first record names the columns. `timestamp_seconds` and cells that
/// are not numbers are skipped, percentages are scaled to `[0, 1]`, and the
/// short label names are mapped onto the standard ones.
pub struct ReplayDetector {
    rows: Vec<ExpressionSample>,
    next: usize,
    latency: Duration,
}

impl ReplayDetector {
    pub fn from_csv(text: &str, latency: Duration) -> Result<Self, ExportError> {
        let mut records = read_records(text)?.into_iter();
        let header = records.next().ok_or_else(|| ExportError::MalformedRecord {
            row: 0,
            reason: "empty recording".into(),
        })?;
        let labels: Vec<&str> = header.iter().map(|h| standard_label(h.trim())).collect();

        let rows: Vec<ExpressionSample> = records
            .map(|record| {
                labels
                    .iter()
                    .zip(&record)
                    .filter(|(label, _)| **label != "timestamp_seconds")
                    .filter_map(|(label, cell)| {
                        let v: f64 = cell.trim().parse().ok()?;
                        Some((label.to_string(), if v > 1.0 { v / 100.0 } else { v }))
                    })
                    .collect::<ExpressionSample>()
            })
            .filter(|s| !s.is_empty())
            .collect();

        if rows.is_empty() {
            return Err(ExportError::MalformedRecord {
                row: 1,
                reason: "no expression values".into(),
            });
        }
        Ok(Self {
            rows,
            next: 0,
            latency,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn standard_label(label: &str) -> &str {
    match label {
        "fear" => "fearful",
        "disgust" => "disgusted",
        "surprise" => "surprised",
        other => other,
    }
}

impl ExpressionDetector for ReplayDetector {
    async fn detect(&mut self) -> Result<Vec<DetectedFace>, SensingError> {
        tokio::time::sleep(self.latency).await;
        let sample = self.rows[self.next % self.rows.len()].clone();
        self.next = (self.next + 1) % self.rows.len();
        Ok(vec![DetectedFace::new(sample)])
    }
}
