//! The pull request a webhook is about, as seen by the handler.
//!
//! [`PullRequestClient`] hides where pull request data comes from. `init`
//! loads everything the handler needs up front (metadata, changed files,
//! reviews, statuses, a checkout of the head branch); the synchronous
//! accessors then read from that snapshot.

pub mod comment;

use std::fmt;
use std::future::Future;

use crate::config::ClusterConfig;
use crate::status::StatusState;
use crate::types::{PrNumber, RepoId};

pub use crate::status::PullRequestStatus;
pub use comment::{
    ClusterApply, ClusterDiff, ClusterStatus, GITHUB_MAX_COMMENT_LEN, comment_bodies,
    comment_chunks, format_apply_comment, format_diff_comment, format_error_comment,
    format_help_comment, format_status_comment,
};

/// Head SHA reported before `init` has loaded the pull request.
pub const UNKNOWN_SHA: &str = "unknown";

/// Access to one pull request.
pub trait PullRequestClient {
    /// The error type returned by this client.
    type Error: fmt::Display + Send + Sync + 'static;

    /// Loads the pull request. Must succeed before anything else is called.
    fn init(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// The clusters this pull request touches, in `env` when it is non-empty.
    ///
    /// `selectors` are globs over descriptive cluster names; `subpath_override`
    /// replaces the computed subpaths.
    fn covered_clusters(
        &self,
        env: &str,
        selectors: &[String],
        subpath_override: Option<&str>,
    ) -> impl Future<Output = Result<Vec<ClusterConfig>, Self::Error>> + Send;

    fn post_comment(&self, body: &str) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Posts `message` formatted as an error report.
    fn post_error_comment(
        &self,
        env: &str,
        message: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Creates or replaces the status with this context on the head commit.
    fn update_status(
        &self,
        state: StatusState,
        context: &str,
        description: &str,
        url: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Squash-merges the pull request.
    fn merge(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Statuses on the head commit.
    fn statuses(&self) -> impl Future<Output = Result<Vec<PullRequestStatus>, Self::Error>> + Send;

    fn is_draft(&self) -> bool;

    fn is_merged(&self) -> bool;

    fn is_mergeable(&self) -> bool;

    /// Whether any review approved the pull request.
    fn approved(&self) -> bool;

    /// The base branch name.
    fn base(&self) -> &str;

    /// How many commits the head is behind the base.
    fn behind_by(&self) -> u64;

    /// The head commit, or [`UNKNOWN_SHA`].
    fn head_sha(&self) -> &str;

    /// Releases the checkout and anything else `init` acquired.
    fn close(&mut self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Creates a client for each pull request a webhook names.
pub trait PullRequestClientSource {
    type Client: PullRequestClient + Send + Sync;

    fn client_for(&self, repo: &RepoId, pr: PrNumber) -> Self::Client;
}
