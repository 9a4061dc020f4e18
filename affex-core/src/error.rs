use thiserror::Error;

/// Errors raised while exporting or re-reading the session record.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("export is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("malformed record on row {row}: {reason}")]
    MalformedRecord { row: usize, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
