//! GitHub webhook event types.
//!
//! Only the deliveries the engine acts on have a variant here; everything
//! else is dropped by the parser before it reaches the handler.
//!
//! # Event Types
//!
//! - `pull_request` with action `opened` or `synchronize`
//! - `issue_comment` with action `created`, on a pull request, whose body is
//!   either a `kubeapply` command or one of the engine's own apply results

use serde::{Deserialize, Serialize};

use crate::types::{PrNumber, RepoId};

/// A webhook delivery the handler should act on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WebhookEvent {
    /// A pull request was opened. Posts help, then diffs.
    PullRequestOpened { repo: RepoId, pr: PrNumber },

    /// New commits were pushed to a pull request. Diffs.
    PullRequestSynchronized { repo: RepoId, pr: PrNumber },

    /// A comment starting with `kubeapply`.
    CommentCommand {
        repo: RepoId,
        pr: PrNumber,
        body: String,
    },

    /// An apply-result comment the engine posted itself; triggers the
    /// automerge check.
    CommentApplyResult {
        repo: RepoId,
        pr: PrNumber,
        body: String,
    },
}

impl WebhookEvent {
    /// Returns the repository this event belongs to.
    pub fn repo(&self) -> &RepoId {
        match self {
            WebhookEvent::PullRequestOpened { repo, .. }
            | WebhookEvent::PullRequestSynchronized { repo, .. }
            | WebhookEvent::CommentCommand { repo, .. }
            | WebhookEvent::CommentApplyResult { repo, .. } => repo,
        }
    }

    /// Returns the pull request this event is about.
    pub fn pr(&self) -> PrNumber {
        match self {
            WebhookEvent::PullRequestOpened { pr, .. }
            | WebhookEvent::PullRequestSynchronized { pr, .. }
            | WebhookEvent::CommentCommand { pr, .. }
            | WebhookEvent::CommentApplyResult { pr, .. } => *pr,
        }
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::PullRequestOpened { .. } => "pull_request.opened",
            WebhookEvent::PullRequestSynchronized { .. } => "pull_request.synchronize",
            WebhookEvent::CommentCommand { .. } => "comment.command",
            WebhookEvent::CommentApplyResult { .. } => "comment.apply_result",
        }
    }
}
