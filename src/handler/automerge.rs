//! Deciding whether a pull request can be merged after an apply.

use crate::status::{PullRequestStatus, WorkflowState, non_apply_green};

/// Body of the comment posted right before merging.
pub const AUTOMERGE_COMMENT: &str =
    "🎉 Auto-merging because changes have been successfully applied in all clusters 🎉";

/// One named requirement for automerge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreMergeCondition {
    pub description: &'static str,
    pub value: bool,
}

/// The automerge requirements, in evaluation order.
///
/// The workflow is complete when every cluster named in a status has a
/// successful diff and a successful apply.
pub fn pre_merge_conditions(
    statuses: &[PullRequestStatus],
    is_draft: bool,
    is_merged: bool,
    is_mergeable: bool,
) -> [PreMergeCondition; 5] {
    [
        PreMergeCondition {
            description: "all statuses green",
            value: non_apply_green(statuses),
        },
        PreMergeCondition {
            description: "workflows completed",
            value: WorkflowState::from_statuses(statuses).is_complete(),
        },
        PreMergeCondition {
            description: "pull request is not a draft",
            value: !is_draft,
        },
        PreMergeCondition {
            description: "pull request is not already merged",
            value: !is_merged,
        },
        PreMergeCondition {
            description: "pull request is mergeable",
            value: is_mergeable,
        },
    ]
}

/// The first unmet condition, if any.
pub fn first_unmet(conditions: &[PreMergeCondition]) -> Option<&PreMergeCondition> {
    conditions.iter().find(|condition| !condition.value)
}
