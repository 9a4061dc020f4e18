use serde::{Deserialize, Serialize};

/// Lifecycle of one session: `Idle -> Running(1) -> ... -> Running(n) -> Ended`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPhase {
    #[default]
    Idle,
    Running(u32),
    Ended,
}

impl SessionPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionPhase::Running(_))
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, SessionPhase::Ended)
    }

    pub fn trial(&self) -> Option<u32> {
        match self {
            SessionPhase::Running(k) => Some(*k),
            _ => None,
        }
    }

    /// Actions are scored only while a trial is running.
    pub fn allows_scoring(&self) -> bool {
        self.is_running()
    }
}
