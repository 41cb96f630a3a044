use serde::{Deserialize, Serialize};

/// Phases of a rollout.
///
/// `Resolving -> Approving -> (DirectDeploy | Batching) -> FinalizingBranch
/// -> FinalDeploy -> [EnforcePhase] -> Done`, with `Failed` reachable from
/// any non-terminal phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RolloutState {
    Resolving,
    Approving,
    /// Empty target: the branch is moved and deployed once, no batches.
    DirectDeploy,
    Batching {
        /// 1-based index of the batch being applied; 0 while the batch plan
        /// is being built.
        current: usize,
        total: usize,
    },
    FinalizingBranch,
    FinalDeploy,
    /// Real runs after a successful trial rollout.
    EnforcePhase {
        current: usize,
        total: usize,
    },
    Done,
    Failed {
        reason: String,
    },
}

impl RolloutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutState::Done | RolloutState::Failed { .. })
    }

    /// Phase name without progress counters.
    pub fn name(&self) -> &'static str {
        match self {
            RolloutState::Resolving => "resolving",
            RolloutState::Approving => "approving",
            RolloutState::DirectDeploy => "direct_deploy",
            RolloutState::Batching { .. } => "batching",
            RolloutState::FinalizingBranch => "finalizing_branch",
            RolloutState::FinalDeploy => "final_deploy",
            RolloutState::EnforcePhase { .. } => "enforce_phase",
            RolloutState::Done => "done",
            RolloutState::Failed { .. } => "failed",
        }
    }
}

impl std::fmt::Display for RolloutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutState::Batching { current, total }
            | RolloutState::EnforcePhase { current, total } => {
                write!(f, "{} ({current}/{total})", self.name())
            }
            RolloutState::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}
