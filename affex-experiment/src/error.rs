use affex_core::ExportError;
use thiserror::Error;

/// Fatal configuration problems, raised before any session state exists.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing {0} in URL parameters")]
    MissingField(&'static str),

    #[error("Invalid value {value:?} for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Unknown evaluation mode \"{0}\"")]
    UnknownPolicy(String),

    #[error("Inconsistent timing: {0}")]
    InconsistentTiming(String),
}

/// Failures of the external face/expression sensing capability.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SensingError {
    #[error("sensing unavailable: {0}")]
    Unavailable(String),

    #[error("detection failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot start session: {0}")]
    SensorUnavailable(SensingError),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session has not ended yet")]
    NotEnded,

    #[error("export failed: {0}")]
    Export(#[from] ExportError),
}
