use serde::{Deserialize, Serialize};

/// Live state of the current trial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrialState {
    pub index: u32,
    pub target_visible: bool,
    pub action_taken: bool,
    pub target_shown: bool,
    pub incorrect_actions: u32,
}

impl TrialState {
    pub fn new(index: u32) -> Self {
        Self {
            index,
            target_visible: false,
            action_taken: false,
            target_shown: false,
            incorrect_actions: 0,
        }
    }

    pub fn into_result(self) -> TrialResult {
        TrialResult {
            trial: self.index,
            correct: self.action_taken,
            target_shown: self.target_shown,
            incorrect_actions: self.incorrect_actions,
        }
    }
}

/// Recorded result per trial
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial: u32,
    pub correct: bool,
    pub target_shown: bool,
    pub incorrect_actions: u32,
}
