pub mod error;
pub mod event;
pub mod export;
pub mod expression;
pub mod log;
pub mod phase;
pub mod summary;
pub mod trial;

pub use error::ExportError;
pub use event::{EventKind, LogEntry};
pub use expression::{DetectedFace, ExpressionSample};
pub use log::{EchoPolicy, EventLog, SharedLog};
pub use phase::SessionPhase;
pub use summary::{summarize, write_summary_csv, TrialSummary};
pub use trial::{TrialResult, TrialState};
