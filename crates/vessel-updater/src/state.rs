//! Update State Machine
//!
//! ```text
//! Idle -> CheckPending -> Available -> Downloading -> Downloaded -> Installing
//!              |              |             |              |
//!              v              v             v              v
//!            Idle           Idle          Failed         Failed
//! ```
//!
//! `Failed` is reachable from every state but `Installing` and only leaves
//! through a fresh check. `Available -> CheckPending` starts a new cycle, and
//! so does `Downloaded -> CheckPending` once launching the installer failed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UpdateState {
    #[default]
    Idle,
    CheckPending,
    Available,
    Downloading,
    Downloaded,
    /// The installer has been launched and the process is about to restart
    Installing,
    Failed,
}

impl UpdateState {
    /// Check if transition to another state is valid
    pub fn can_transition_to(&self, target: UpdateState) -> bool {
        use UpdateState::*;

        match (self, target) {
            (a, b) if *a == b => true,
            (Installing, _) => false,
            (_, Failed) => true,
            (Idle, CheckPending) => true,
            (CheckPending, Available) | (CheckPending, Idle) => true,
            // snooze / ignore, or a fresh check
            (Available, Idle) | (Available, CheckPending) => true,
            (Available, Downloading) => true,
            (Downloading, Downloaded) => true,
            (Downloaded, Installing) | (Downloaded, CheckPending) => true,
            (Failed, CheckPending) => true,
            _ => false,
        }
    }

    /// A download or install is underway and a new check must not interrupt it.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            UpdateState::Downloading | UpdateState::Downloaded | UpdateState::Installing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::CheckPending => "checkPending",
            UpdateState::Available => "available",
            UpdateState::Downloading => "downloading",
            UpdateState::Downloaded => "downloaded",
            UpdateState::Installing => "installing",
            UpdateState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for UpdateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
