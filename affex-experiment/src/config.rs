use crate::error::ConfigError;
use crate::stage::StageDimensions;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// How windowed expression evidence is reduced to a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationPolicy {
    /// Mean happy confidence must reach the threshold.
    Percent,
    /// Summed happy confidence must exceed summed fearful confidence.
    Ratio,
}

impl EvaluationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationPolicy::Percent => "percent",
            EvaluationPolicy::Ratio => "ratio",
        }
    }

    /// Ratio comparison needs more accumulated samples to be stable.
    pub fn default_window(&self) -> Duration {
        match self {
            EvaluationPolicy::Percent => Duration::from_millis(1000),
            EvaluationPolicy::Ratio => Duration::from_millis(4000),
        }
    }
}

impl FromStr for EvaluationPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percent" => Ok(EvaluationPolicy::Percent),
            "ratio" => Ok(EvaluationPolicy::Ratio),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for EvaluationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bound for the whole session and for every configured duration.
/// Keeps all session instants well inside the nanosecond timestamp range.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Session settings, read once before the session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    pub subject_id: String,
    pub session_number: String,

    pub trial_count: u32,
    pub trial_duration: Duration,
    pub target_onset: Duration,
    pub target_offset: Duration,
    pub target_visible_duration: Duration,
    pub target_disappear_duration: Duration,
    pub feedback_delay: Duration,
    pub feedback_duration: Duration,
    pub target_images: u32,
    pub stage: StageDimensions,

    pub sampling_interval: Duration,
    pub detection_timeout: Duration,
    pub log_all_faces: bool,

    pub evaluation_policy: EvaluationPolicy,
    pub threshold: f64,
    pub evaluation_window: Duration,

    pub show_video: bool,
    pub log_sensor_negatives: bool,
}

/// Canonical keys and the older names still accepted for them, in
/// decreasing priority.
const ALIASES: &[(&str, &[&str])] = &[
    ("target_onset", &["starfish_onset"]),
    ("target_offset", &["starfish_offset"]),
    ("target_disappear_duration", &["starfish_disappear_duration"]),
    ("feedback_delay", &["coin_appear_delay"]),
    ("feedback_duration", &["gold_coin_duration"]),
    ("sampling_interval", &["detect_faces_interval"]),
    ("evaluation_mode", &["threshold_mode", "happy_threshold_mode"]),
    ("threshold", &["happy_threshold"]),
    ("evaluation_window", &["threshold_timespan", "happy_threshold_timespan"]),
    ("log_sensor_negatives", &["log_detected"]),
];

const KNOWN_KEYS: &[&str] = &[
    "subject_id",
    "session_number",
    "number_of_trials",
    "trial_duration",
    "target_onset",
    "target_offset",
    "target_visible_duration",
    "target_disappear_duration",
    "feedback_delay",
    "feedback_duration",
    "target_images",
    "stage_width",
    "stage_height",
    "target_width",
    "target_height",
    "sampling_interval",
    "detection_timeout",
    "log_all_faces",
    "evaluation_mode",
    "threshold",
    "evaluation_window",
    "show_video",
    "log_sensor_negatives",
    // presentation-only settings of the animated agent
    "fish_speed",
];

/// Resolves a key to its canonical name and priority (0 is canonical).
fn canonical(key: &str) -> Option<(&'static str, usize)> {
    if let Some(k) = KNOWN_KEYS.iter().find(|k| **k == key) {
        return Some((*k, 0));
    }
    ALIASES.iter().find_map(|(canon, aliases)| {
        aliases
            .iter()
            .position(|a| *a == key)
            .map(|i| (*canon, i + 1))
    })
}

/// Decodes `+` and `%XX` escapes of a query-string component.
fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Splits a query string into decoded key/value pairs, in order.
pub fn query_pairs(query: &str) -> impl Iterator<Item = (String, String)> + '_ {
    query
        .trim_start_matches('?')
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (percent_decode(k), percent_decode(v))
        })
}

struct Params(HashMap<&'static str, (usize, String)>);

impl Params {
    fn collect<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map: HashMap<&'static str, (usize, String)> = HashMap::new();
        for (key, value) in pairs {
            let key = key.as_ref();
            let Some((canon, rank)) = canonical(key) else {
                warn!("Ignoring unknown parameter {key:?}");
                continue;
            };
            let value = value.into();
            match map.get(canon) {
                Some((existing, _)) if *existing <= rank => {}
                _ => {
                    map.insert(canon, (rank, value));
                }
            }
        }
        Self(map)
    }

    /// Empty values count as absent.
    fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key)
            .map(str::to_string)
            .ok_or(ConfigError::MissingField(key))
    }

    fn number<T: FromStr>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T::Err: fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::InvalidValue {
                key,
                value: raw.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn millis(&self, key: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
        self.number::<u64>(key, default_ms).map(Duration::from_millis)
    }

    fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }
}

impl Configuration {
    /// Parses a query string such as `subject_id=1&session_number=2`.
    pub fn from_query(query: &str) -> Result<Self, ConfigError> {
        Self::from_pairs(query_pairs(query))
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let p = Params::collect(pairs);

        let subject_id = p.required("subject_id")?;
        let session_number = p.required("session_number")?;

        let evaluation_policy: EvaluationPolicy =
            p.get("evaluation_mode").unwrap_or("percent").parse()?;
        let default_window = evaluation_policy.default_window().as_millis() as u64;

        let stage = StageDimensions {
            width: p.number("stage_width", 800.0)?,
            height: p.number("stage_height", 600.0)?,
            target_width: p.number("target_width", 100.0)?,
            target_height: p.number("target_height", 100.0)?,
        };

        let config = Self {
            subject_id,
            session_number,
            trial_count: p.number("number_of_trials", 60)?,
            trial_duration: p.millis("trial_duration", 5000)?,
            target_onset: p.millis("target_onset", 1000)?,
            target_offset: p.millis("target_offset", 4000)?,
            target_visible_duration: p.millis("target_visible_duration", 1000)?,
            target_disappear_duration: p.millis("target_disappear_duration", 500)?,
            feedback_delay: p.millis("feedback_delay", 100)?,
            feedback_duration: p.millis("feedback_duration", 200)?,
            target_images: p.number("target_images", 8)?,
            stage,
            sampling_interval: p.millis("sampling_interval", 100)?,
            detection_timeout: p.millis("detection_timeout", 2000)?,
            log_all_faces: p.flag("log_all_faces"),
            evaluation_policy,
            threshold: p.number("threshold", 0.1)?,
            evaluation_window: p.millis("evaluation_window", default_window)?,
            show_video: p.flag("show_video"),
            log_sensor_negatives: p.flag("log_sensor_negatives"),
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything except the identifiers.
    pub fn with_ids(subject_id: &str, session_number: &str) -> Result<Self, ConfigError> {
        Self::from_pairs([("subject_id", subject_id), ("session_number", session_number)])
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: String| Err(ConfigError::InconsistentTiming(msg));
        if self.trial_count == 0 {
            return bad("number_of_trials must be at least 1".into());
        }
        if self.trial_duration.is_zero() {
            return bad("trial_duration must be positive".into());
        }
        let durations = [
            ("trial_duration", self.trial_duration),
            ("target_visible_duration", self.target_visible_duration),
            ("target_disappear_duration", self.target_disappear_duration),
            ("feedback_delay", self.feedback_delay),
            ("feedback_duration", self.feedback_duration),
            ("sampling_interval", self.sampling_interval),
            ("detection_timeout", self.detection_timeout),
            ("evaluation_window", self.evaluation_window),
        ];
        for (key, d) in durations {
            if d > MAX_SESSION_DURATION {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: d.as_millis().to_string(),
                    reason: format!("must not exceed {} ms", MAX_SESSION_DURATION.as_millis()),
                });
            }
        }
        match self.trial_duration.checked_mul(self.trial_count) {
            Some(total) if total <= MAX_SESSION_DURATION => {}
            _ => {
                return bad(format!(
                    "{} trials x {} ms exceeds the {} ms session limit",
                    self.trial_count,
                    self.trial_duration.as_millis(),
                    MAX_SESSION_DURATION.as_millis()
                ));
            }
        }
        if self.target_onset >= self.target_offset {
            return bad(format!(
                "target_onset ({} ms) must be before target_offset ({} ms)",
                self.target_onset.as_millis(),
                self.target_offset.as_millis()
            ));
        }
        if self.target_offset > self.trial_duration {
            return bad(format!(
                "target_offset ({} ms) exceeds trial_duration ({} ms)",
                self.target_offset.as_millis(),
                self.trial_duration.as_millis()
            ));
        }
        if self.evaluation_window.is_zero() {
            return bad("evaluation_window must be positive".into());
        }
        if !self.threshold.is_finite() {
            return Err(ConfigError::InvalidValue {
                key: "threshold",
                value: self.threshold.to_string(),
                reason: "must be a finite number".into(),
            });
        }
        let dims = [
            self.stage.width,
            self.stage.height,
            self.stage.target_width,
            self.stage.target_height,
        ];
        if dims.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "stage",
                value: format!("{dims:?}"),
                reason: "dimensions must be finite and non-negative".into(),
            });
        }
        Ok(())
    }

    /// Total session length: trial count times trial duration.
    pub fn session_duration(&self) -> Duration {
        self.trial_duration * self.trial_count
    }

    pub fn export_filename(&self) -> String {
        format!(
            "AFFEX_results_{}_{}.csv",
            sanitize(&self.subject_id),
            sanitize(&self.session_number)
        )
    }

    /// Resolved settings as recorded at the top of the session log.
    pub fn to_metadata(&self) -> Value {
        let ms = |d: Duration| d.as_millis() as u64;
        json!({
            "subject_id": self.subject_id,
            "session_number": self.session_number,
            "number_of_trials": self.trial_count,
            "trial_duration": ms(self.trial_duration),
            "target_onset": ms(self.target_onset),
            "target_offset": ms(self.target_offset),
            "target_visible_duration": ms(self.target_visible_duration),
            "target_disappear_duration": ms(self.target_disappear_duration),
            "feedback_delay": ms(self.feedback_delay),
            "feedback_duration": ms(self.feedback_duration),
            "target_images": self.target_images,
            "stage_width": self.stage.width,
            "stage_height": self.stage.height,
            "target_width": self.stage.target_width,
            "target_height": self.stage.target_height,
            "sampling_interval": ms(self.sampling_interval),
            "detection_timeout": ms(self.detection_timeout),
            "log_all_faces": self.log_all_faces,
            "evaluation_mode": self.evaluation_policy.as_str(),
            "threshold": self.threshold,
            "evaluation_window": ms(self.evaluation_window),
            "show_video": self.show_video,
            "log_sensor_negatives": self.log_sensor_negatives,
        })
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_follow_the_surface() {
        let c = Configuration::from_query("subject_id=42&session_number=1").unwrap();
        assert_eq!(c.trial_count, 60);
        assert_eq!(c.trial_duration, Duration::from_millis(5000));
        assert_eq!((c.target_onset, c.target_offset), (Duration::from_secs(1), Duration::from_secs(4)));
        assert_eq!(c.target_disappear_duration, Duration::from_millis(500));
        assert_eq!(c.feedback_delay, Duration::from_millis(100));
        assert_eq!(c.feedback_duration, Duration::from_millis(200));
        assert_eq!(c.sampling_interval, Duration::from_millis(100));
        assert_eq!(c.evaluation_policy, EvaluationPolicy::Percent);
        assert_eq!(c.threshold, 0.1);
        assert_eq!(c.evaluation_window, Duration::from_millis(1000));
        assert!(!c.show_video && !c.log_sensor_negatives);
        assert_eq!(c.session_duration(), Duration::from_secs(300));
        assert_eq!(c.export_filename(), "AFFEX_results_42_1.csv");
    }

    #[test]
    fn ratio_mode_lengthens_default_window() {
        let c = Configuration::from_query("?subject_id=a&session_number=b&evaluation_mode=ratio")
            .unwrap();
        assert_eq!(c.evaluation_window, Duration::from_millis(4000));
        let c = Configuration::from_query(
            "subject_id=a&session_number=b&evaluation_mode=ratio&evaluation_window=2500",
        )
        .unwrap();
        assert_eq!(c.evaluation_window, Duration::from_millis(2500));
    }

    #[test]
    fn missing_identifiers_are_fatal() {
        assert_eq!(
            Configuration::from_query("session_number=1"),
            Err(ConfigError::MissingField("subject_id"))
        );
        assert_eq!(
            Configuration::from_query("subject_id=1&session_number="),
            Err(ConfigError::MissingField("session_number"))
        );
    }

    #[test]
    fn unknown_policy_is_fatal() {
        assert_eq!(
            Configuration::from_query("subject_id=1&session_number=1&evaluation_mode=median"),
            Err(ConfigError::UnknownPolicy("median".into()))
        );
    }

    #[test]
    fn legacy_names_are_accepted_but_canonical_wins() {
        let c = Configuration::from_query(
            "subject_id=1&session_number=1&happy_threshold_mode=ratio&threshold_mode=percent\
             &happy_threshold=0.4&starfish_onset=500&detect_faces_interval=250&log_detected=true",
        )
        .unwrap();
        assert_eq!(c.evaluation_policy, EvaluationPolicy::Percent);
        assert_eq!(c.threshold, 0.4);
        assert_eq!(c.target_onset, Duration::from_millis(500));
        assert_eq!(c.sampling_interval, Duration::from_millis(250));
        assert!(c.log_sensor_negatives);

        let c = Configuration::from_query(
            "subject_id=1&session_number=1&threshold=0.2&happy_threshold=0.9",
        )
        .unwrap();
        assert_eq!(c.threshold, 0.2);
    }

    #[test]
    fn inconsistent_onset_window_is_rejected() {
        let err = Configuration::from_query(
            "subject_id=1&session_number=1&target_onset=3000&target_offset=2000",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiming(_)));

        let err = Configuration::from_query(
            "subject_id=1&session_number=1&trial_duration=3000",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiming(_)));
    }

    #[test]
    fn oversized_sessions_are_rejected_before_any_arithmetic() {
        let err = Configuration::from_query(
            "subject_id=1&session_number=1&trial_duration=18446744073709551615\
             &number_of_trials=4294967295",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "trial_duration", .. }));

        let err = Configuration::from_query(
            "subject_id=1&session_number=1&trial_duration=86400000&number_of_trials=4294967295",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InconsistentTiming(_)));

        let err = Configuration::from_query(
            "subject_id=1&session_number=1&detection_timeout=18446744073709551615",
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "detection_timeout", .. }));

        let c = Configuration::from_query(
            "subject_id=1&session_number=1&trial_duration=86400000&number_of_trials=1",
        )
        .unwrap();
        assert_eq!(c.session_duration(), MAX_SESSION_DURATION);
    }

    #[test]
    fn malformed_numbers_name_the_key() {
        let err = Configuration::from_query("subject_id=1&session_number=1&number_of_trials=ten")
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "number_of_trials", .. }));
    }

    #[test]
    fn decodes_query_escapes() {
        let c = Configuration::from_query("subject_id=P%2007+x&session_number=1&show_video=true")
            .unwrap();
        assert_eq!(c.subject_id, "P 07 x");
        assert!(c.show_video);
        assert_eq!(c.export_filename(), "AFFEX_results_P_07_x_1.csv");
    }

    #[test]
    fn metadata_records_resolved_values() {
        let c = Configuration::with_ids("s", "2").unwrap();
        let m = c.to_metadata();
        assert_eq!(m["evaluation_mode"], "percent");
        assert_eq!(m["evaluation_window"], 1000);
        assert_eq!(m["number_of_trials"], 60);
    }
}
