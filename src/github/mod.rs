//! GitHub implementation of the pull request collaborator.
//!
//! `init` reads the pull request, its changed files, reviews, head statuses and
//! comparison with the base through the REST API, then shallow-clones the head
//! branch so cluster coverage can be resolved against real files.

mod client;
mod error;
mod pull_request;

pub use client::{OctocrabClient, octocrab_from_token};
pub use error::{GitHubApiError, GitHubErrorKind};
pub use pull_request::{GitHubClientSource, GitHubPullRequestClient, PullRequestError};
