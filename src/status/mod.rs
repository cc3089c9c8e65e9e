//! Status checks as the engine's only persistent state.
//!
//! Every command writes a commit status whose context names the command and
//! environment, and whose description lists the clusters it ran for:
//!
//! ```text
//! context:     kubeapply/apply (production)
//! description: Successfully ran for clusters 1f2e3d4c,9a8b7c6d
//! ```
//!
//! Cluster names are hashed to 8 hex characters so the list fits in GitHub's
//! description limit. Reading the statuses back tells the automerge check which
//! clusters have been diffed and applied, without any storage of our own.

pub mod format;
pub mod parse;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use format::{
    DESCRIPTION_LIMIT, StatusOutcome, cluster_id, command_context, hashed_cluster_names,
    status_description,
};
pub use parse::{DecodedStatus, WorkflowState, all_green, decode_status, non_apply_green};

/// State of a commit status, as accepted by the GitHub statuses API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

impl StatusState {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusState::Pending => "pending",
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Error => "error",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single status check on a pull request's head commit.
///
/// Statuses are identified by `context`; a later write with the same context
/// replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestStatus {
    pub context: String,
    #[serde(default)]
    pub description: String,
    pub state: StatusState,
}

impl PullRequestStatus {
    pub fn new(
        context: impl Into<String>,
        description: impl Into<String>,
        state: StatusState,
    ) -> Self {
        PullRequestStatus {
            context: context.into(),
            description: description.into(),
            state,
        }
    }

    /// Whether this status is green.
    pub fn is_success(&self) -> bool {
        self.state == StatusState::Success
    }
}
