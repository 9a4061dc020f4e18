//! Session time for affect-gated experiments: a monotonic clock with a wall
//! anchor, drift-corrected repeating deadlines and tick-lateness statistics.

pub mod clock;
pub mod timer;

pub use clock::{Clock, ManualClock, SessionClock, Timestamp};
pub use timer::{format_countdown, run_repeating, DriftCorrectedTimer, TimingStats, TimingSummary};
