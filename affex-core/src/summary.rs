//! Per-trial condensation of an exported session log.

use crate::error::ExportError;
use crate::event::EventKind;
use crate::export::into_text;
use crate::expression::STANDARD_LABELS;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialSummary {
    pub trial: u32,
    /// Mean confidence per expression label over the trial's detections.
    pub expression_means: BTreeMap<String, f64>,
    /// First `Average happy` computed in the trial, if it had evidence.
    pub average_happy: Option<f64>,
    pub faces_detected: usize,
    pub no_face_detected: usize,
    pub correct_actions: usize,
    pub incorrect_actions: usize,
    pub target_image: Option<String>,
}

#[derive(Default)]
struct Accumulator {
    trial: u32,
    expressions: BTreeMap<String, (f64, usize)>,
    average_happy: Option<Option<f64>>,
    faces: usize,
    no_faces: usize,
    correct: usize,
    incorrect: usize,
    image: Option<String>,
}

impl Accumulator {
    fn new(trial: u32) -> Self {
        Self {
            trial,
            ..Default::default()
        }
    }

    fn absorb(&mut self, kind: EventKind, metadata: &[String]) {
        match kind {
            EventKind::FaceDetected => {
                self.faces += 1;
                for pair in metadata.chunks(2) {
                    if let [label, value] = pair {
                        if let Ok(v) = value.parse::<f64>() {
                            let slot = self.expressions.entry(label.clone()).or_insert((0.0, 0));
                            slot.0 += v;
                            slot.1 += 1;
                        }
                    }
                }
            }
            EventKind::NoFaceDetected => self.no_faces += 1,
            EventKind::TargetAppeared => {
                self.image = match metadata {
                    [key, value, ..] if key == "image" => Some(value.clone()),
                    [value, ..] if !value.is_empty() => Some(value.clone()),
                    _ => None,
                };
            }
            EventKind::AverageHappy if self.average_happy.is_none() => {
                let value = metadata.first().and_then(|v| v.parse::<f64>().ok());
                self.average_happy = Some(value);
            }
            EventKind::ActionCorrect => self.correct += 1,
            EventKind::ActionIncorrect => self.incorrect += 1,
            _ => {}
        }
    }

    fn finish(self) -> TrialSummary {
        TrialSummary {
            trial: self.trial,
            expression_means: self
                .expressions
                .into_iter()
                .map(|(k, (sum, n))| (k, sum / n as f64))
                .collect(),
            average_happy: self.average_happy.flatten(),
            faces_detected: self.faces,
            no_face_detected: self.no_faces,
            correct_actions: self.correct,
            incorrect_actions: self.incorrect,
            target_image: self.image,
        }
    }
}

/// Groups parsed export records by `Trial started` rows.
///
/// Rows before the first trial, rows with fewer than three fields and rows
/// with unknown event labels are skipped.
pub fn summarize(records: &[Vec<String>]) -> Result<Vec<TrialSummary>, ExportError> {
    let mut trials = Vec::new();
    let mut current: Option<Accumulator> = None;

    for (row, record) in records.iter().enumerate() {
        if record.len() < 3 {
            continue;
        }
        let Some(kind) = EventKind::from_label(&record[1]) else {
            continue;
        };
        let metadata = &record[2..];
        if kind == EventKind::TrialStarted {
            let trial = metadata[0]
                .parse::<u32>()
                .map_err(|e| ExportError::MalformedRecord {
                    row: row + 1,
                    reason: format!("trial number {:?}: {e}", metadata[0]),
                })?;
            if let Some(done) = current.replace(Accumulator::new(trial)) {
                trials.push(done.finish());
            }
        } else if let Some(acc) = current.as_mut() {
            acc.absorb(kind, metadata);
        }
    }
    if let Some(done) = current {
        trials.push(done.finish());
    }
    Ok(trials)
}

fn round2(x: f64) -> String {
    format!("{}", (x * 100.0).round() / 100.0)
}

/// Renders summaries with one column per expression label seen anywhere.
pub fn write_summary_csv(trials: &[TrialSummary]) -> Result<String, ExportError> {
    let mut labels: Vec<String> = STANDARD_LABELS.iter().map(|s| s.to_string()).collect();
    for t in trials {
        for label in t.expression_means.keys() {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
    }

    let mut header = vec!["trial_number".to_string()];
    header.extend(labels.iter().cloned());
    header.extend(
        [
            "Average Happy",
            "Face detected",
            "No face detected",
            "Action correct",
            "Action incorrect",
            "target_image",
        ]
        .map(String::from),
    );

    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());
    writer.write_record(&header)?;
    for t in trials {
        let mut row = vec![t.trial.to_string()];
        for label in &labels {
            row.push(
                t.expression_means
                    .get(label)
                    .map(|v| round2(*v))
                    .unwrap_or_else(|| "nan".to_string()),
            );
        }
        row.push(t.average_happy.map(round2).unwrap_or_else(|| "nan".to_string()));
        row.push(t.faces_detected.to_string());
        row.push(t.no_face_detected.to_string());
        row.push(t.correct_actions.to_string());
        row.push(t.incorrect_actions.to_string());
        row.push(t.target_image.clone().unwrap_or_else(|| "None".to_string()));
        writer.write_record(&row)?;
    }
    into_text(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::read_records;
    use pretty_assertions::assert_eq;

    const EXPORT: &str = "Timestamp,Event,Metadata\n\
\"t0\",\"Session started\",\"\"\n\
\"t1\",\"Trial started\",\"1\"\n\
\"t2\",\"Face detected\",\"happy\",\"0.2\",\"fearful\",\"0.1\"\n\
\"t3\",\"Face detected\",\"happy\",\"0.4\",\"fearful\",\"0.3\"\n\
\"t4\",\"Target appeared\",\"image\",\"image3.png\",\"x\",\"10\",\"y\",\"20\"\n\
\"t5\",\"Average happy\",\"0.3\"\n\
\"t6\",\"Action correct\",\"\"\n\
\"t7\",\"Average happy\",\"0.9\"\n\
\"t8\",\"Trial started\",\"2\"\n\
\"t9\",\"No face detected\",\"\"\n\
\"t10\",\"Average happy\",\"\"\n\
\"t11\",\"Action incorrect\",\"\"\n";

    #[test]
    fn groups_rows_by_trial() {
        let records = read_records(EXPORT).unwrap();
        let trials = summarize(&records).unwrap();
        assert_eq!(trials.len(), 2);

        let first = &trials[0];
        assert_eq!(first.trial, 1);
        assert_eq!(first.faces_detected, 2);
        assert!((first.expression_means["happy"] - 0.3).abs() < 1e-9);
        assert_eq!(first.average_happy, Some(0.3));
        assert_eq!(first.correct_actions, 1);
        assert_eq!(first.target_image.as_deref(), Some("image3.png"));

        let second = &trials[1];
        assert_eq!(second.no_face_detected, 1);
        assert_eq!(second.average_happy, None);
        assert_eq!(second.incorrect_actions, 1);
    }

    #[test]
    fn renders_nan_for_missing_values() {
        let records = read_records(EXPORT).unwrap();
        let csv = write_summary_csv(&summarize(&records).unwrap()).unwrap();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(
            lines[0],
            "trial_number,neutral,happy,sad,angry,fearful,disgusted,surprised,\
             Average Happy,Face detected,No face detected,Action correct,Action incorrect,target_image"
        );
        assert_eq!(lines[1], "1,nan,0.3,nan,nan,0.2,nan,nan,0.3,2,0,1,0,image3.png");
        assert_eq!(lines[2], "2,nan,nan,nan,nan,nan,nan,nan,nan,0,1,0,1,None");
    }

    #[test]
    fn bad_trial_number_is_reported() {
        let records = read_records("\"t\",\"Trial started\",\"one\"\n").unwrap();
        assert!(matches!(
            summarize(&records),
            Err(ExportError::MalformedRecord { row: 1, .. })
        ));
    }
}
