//! Pipeline run domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::partition::PartitionKey;

/// State of one partition's pipeline run
///
/// `Pending -> Loaded -> Transformed -> Consumed`, with `Failed` reachable
/// from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartitionState {
    Pending,
    Loaded,
    Transformed,
    Consumed,
    Failed,
}

impl PartitionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PartitionState::Consumed | PartitionState::Failed)
    }
}

impl fmt::Display for PartitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionState::Pending => write!(f, "Pending"),
            PartitionState::Loaded => write!(f, "Loaded"),
            PartitionState::Transformed => write!(f, "Transformed"),
            PartitionState::Consumed => write!(f, "Consumed"),
            PartitionState::Failed => write!(f, "Failed"),
        }
    }
}

/// Final outcome of one partition's pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionOutcome {
    pub partition_key: PartitionKey,
    pub state: PartitionState,
    /// Last state reached before failing
    pub failed_after: Option<PartitionState>,
    pub error: Option<String>,
}

impl PartitionOutcome {
    pub fn succeeded(&self) -> bool {
        self.state == PartitionState::Consumed
    }
}
