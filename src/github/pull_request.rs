//! [`PullRequestClient`] backed by the GitHub REST API and a shallow clone.

use std::path::PathBuf;

use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::client::OctocrabClient;
use super::error::GitHubApiError;
use crate::config::ClusterConfig;
use crate::coverage::{CoverageError, resolve_covered_clusters};
use crate::git::{GitError, github_clone_url, head_sha, shallow_clone};
use crate::pullreq::{
    PullRequestClient, PullRequestClientSource, PullRequestStatus, UNKNOWN_SHA, comment_bodies,
    format_error_comment,
};
use crate::status::StatusState;
use crate::types::{PrNumber, RepoId};

/// Page size for paginated list endpoints.
const PER_PAGE: usize = 100;

/// Longest comment excerpt written to the log.
const LOG_SNIPPET_LEN: usize = 1000;

/// Errors from [`GitHubPullRequestClient`].
#[derive(Debug, Error)]
pub enum PullRequestError {
    #[error(transparent)]
    Api(#[from] GitHubApiError),

    #[error("failed to clone head branch: {0}")]
    Clone(#[from] GitError),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error("pull request client used before init")]
    NotInitialized,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("checkout error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct RawPull {
    head: RawRef,
    base: RawRef,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    merged: bool,
    mergeable: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct RawMergeResult {
    #[serde(default)]
    merged: bool,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RawReview {
    #[serde(default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct RawCombinedStatus {
    #[serde(default)]
    statuses: Vec<RawStatus>,
}

#[derive(Debug, Deserialize)]
struct RawStatus {
    context: String,
    state: StatusState,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawComparison {
    #[serde(default)]
    behind_by: u64,
}

#[derive(Serialize)]
struct Page {
    per_page: usize,
    page: usize,
}

/// Everything `init` loads.
#[derive(Debug)]
struct Snapshot {
    pull: RawPull,
    files: Vec<String>,
    approved: bool,
    statuses: Vec<PullRequestStatus>,
    behind_by: u64,
    checkout: TempDir,
}

impl Snapshot {
    fn repo_root(&self) -> PathBuf {
        self.checkout.path().join("repo")
    }
}

/// A pull request on GitHub.
#[derive(Debug)]
pub struct GitHubPullRequestClient {
    client: OctocrabClient,
    token: String,
    pr: PrNumber,
    snapshot: Option<Snapshot>,
}

impl GitHubPullRequestClient {
    /// `token` authenticates the clone; it should be the one `octocrab` uses.
    pub fn new(octocrab: Octocrab, token: impl Into<String>, repo: RepoId, pr: PrNumber) -> Self {
        GitHubPullRequestClient {
            client: OctocrabClient::new(octocrab, repo),
            token: token.into(),
            pr,
            snapshot: None,
        }
    }

    fn snapshot(&self) -> Result<&Snapshot, PullRequestError> {
        self.snapshot.as_ref().ok_or(PullRequestError::NotInitialized)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        path: &str,
    ) -> Result<T, GitHubApiError> {
        self.client
            .inner()
            .get(self.client.route(path), None::<&()>)
            .await
            .map_err(|e| api_error(action, e))
    }

    /// Fetches every page of a list endpoint.
    async fn get_all<T: serde::de::DeserializeOwned>(
        &self,
        action: &str,
        path: &str,
    ) -> Result<Vec<T>, GitHubApiError> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let items: Vec<T> = self
                .client
                .inner()
                .get(
                    self.client.route(path),
                    Some(&Page {
                        per_page: PER_PAGE,
                        page,
                    }),
                )
                .await
                .map_err(|e| api_error(action, e))?;

            let count = items.len();
            all.extend(items);
            debug!(action, page, count, "fetched page");

            if count < PER_PAGE {
                return Ok(all);
            }
            page += 1;
        }
    }

    async fn post_one_comment(&self, body: &str) -> Result<(), GitHubApiError> {
        #[derive(Serialize)]
        struct CommentRequest<'a> {
            body: &'a str,
        }

        let _: serde_json::Value = self
            .client
            .inner()
            .post(
                self.client.route(&format!("issues/{}/comments", self.pr.0)),
                Some(&CommentRequest { body }),
            )
            .await
            .map_err(|e| api_error("posting comment", e))?;
        Ok(())
    }
}

fn api_error(action: &str, err: octocrab::Error) -> GitHubApiError {
    let err = GitHubApiError::from_octocrab(action, err);
    warn!(
        action,
        transient = err.kind.is_transient(),
        status = ?err.status_code,
        "GitHub request failed"
    );
    err
}

impl PullRequestClient for GitHubPullRequestClient {
    type Error = PullRequestError;

    async fn init(&mut self) -> Result<(), PullRequestError> {
        let repo = self.client.repo().clone();
        let pr = self.pr;

        info!(owner = %repo.owner, repo = %repo.repo, pr = %pr, "getting pull request");
        let pull: RawPull = self
            .get("fetching pull request", &format!("pulls/{}", pr.0))
            .await?;

        let files: Vec<RawFile> = self
            .get_all("listing changed files", &format!("pulls/{}/files", pr.0))
            .await?;
        info!(pr = %pr, files = files.len(), "got changed files");

        let reviews: Vec<RawReview> = self
            .get_all("listing reviews", &format!("pulls/{}/reviews", pr.0))
            .await?;
        let approved = reviews
            .iter()
            .any(|review| review.state.eq_ignore_ascii_case("approved"));

        let combined: RawCombinedStatus = self
            .get(
                "getting combined status",
                &format!("commits/{}/status?per_page={}", pull.head.sha, PER_PAGE),
            )
            .await?;
        let statuses = combined
            .statuses
            .into_iter()
            .map(|s| PullRequestStatus::new(s.context, s.description.unwrap_or_default(), s.state))
            .collect();

        let comparison: RawComparison = self
            .get(
                "comparing with base",
                &format!("compare/{}...{}", pull.base.ref_field, pull.head.ref_field),
            )
            .await?;

        let checkout = tempfile::Builder::new().prefix("kubeapply").tempdir()?;
        let url = github_clone_url(&repo.owner, &repo.repo, &self.token);
        let branch = pull.head.ref_field.clone();
        let dest = checkout.path().join("repo");
        let checked_out = tokio::task::spawn_blocking(move || {
            shallow_clone(&url, &branch, &dest)?;
            head_sha(&dest)
        })
        .await??;
        if checked_out.as_str() != pull.head.sha {
            warn!(
                pr = %pr,
                expected = %pull.head.sha,
                checked_out = %checked_out.short(),
                "head branch moved since the pull request was fetched"
            );
        }

        self.snapshot = Some(Snapshot {
            pull,
            files: files.into_iter().map(|f| f.filename).collect(),
            approved,
            statuses,
            behind_by: comparison.behind_by,
            checkout,
        });
        Ok(())
    }

    async fn covered_clusters(
        &self,
        env: &str,
        selectors: &[String],
        subpath_override: Option<&str>,
    ) -> Result<Vec<ClusterConfig>, PullRequestError> {
        let snapshot = self.snapshot()?;
        let root = snapshot.repo_root();
        let files = snapshot.files.clone();
        let env = env.to_string();
        let selectors = selectors.to_vec();
        let subpath_override = subpath_override.map(str::to_string);

        let clusters = tokio::task::spawn_blocking(move || {
            resolve_covered_clusters(&root, &files, &env, &selectors, subpath_override.as_deref())
        })
        .await??;
        Ok(clusters)
    }

    async fn post_comment(&self, body: &str) -> Result<(), PullRequestError> {
        let bodies = comment_bodies(body);
        let total = bodies.len();

        for (index, chunk) in bodies.iter().enumerate() {
            let mut end = chunk.len().min(LOG_SNIPPET_LEN);
            while !chunk.is_char_boundary(end) {
                end -= 1;
            }
            info!(
                pr = %self.pr,
                chunk = index + 1,
                total,
                snippet = &chunk[..end],
                "posting comment"
            );
            self.post_one_comment(chunk).await?;
        }
        Ok(())
    }

    async fn post_error_comment(&self, env: &str, message: &str) -> Result<(), PullRequestError> {
        self.post_comment(&format_error_comment(env, message)).await
    }

    async fn update_status(
        &self,
        state: StatusState,
        context: &str,
        description: &str,
        url: &str,
    ) -> Result<(), PullRequestError> {
        #[derive(Serialize)]
        struct StatusRequest<'a> {
            state: StatusState,
            context: &'a str,
            description: &'a str,
            target_url: &'a str,
        }

        let sha = self.head_sha().to_string();
        info!(sha = %sha, state = %state, context, description, "updating status");

        let _: serde_json::Value = self
            .client
            .inner()
            .post(
                self.client.route(&format!("statuses/{}", sha)),
                Some(&StatusRequest {
                    state,
                    context,
                    description,
                    target_url: url,
                }),
            )
            .await
            .map_err(|e| api_error("creating status", e))?;
        Ok(())
    }

    async fn merge(&self) -> Result<(), PullRequestError> {
        #[derive(Serialize)]
        struct MergeRequest {
            commit_title: String,
            merge_method: &'static str,
        }

        let request = MergeRequest {
            commit_title: format!("Merged by kubeapply (pull request {})", self.pr.0),
            merge_method: "squash",
        };

        let result: Result<RawMergeResult, _> = self
            .client
            .inner()
            .put(
                self.client.route(&format!("pulls/{}/merge", self.pr.0)),
                Some(&request),
            )
            .await;

        let err = match result {
            Ok(RawMergeResult { merged: true, .. }) => {
                info!(pr = %self.pr, "merged pull request");
                return Ok(());
            }
            Ok(RawMergeResult { message, .. }) => GitHubApiError::permanent_without_source(
                format!("merging pull request: {}", message.unwrap_or_default()),
            ),
            Err(e) => GitHubApiError::from_octocrab("merging pull request", e),
        };
        warn!(pr = %self.pr, kind = ?err.kind, error = %err, "merge failed");
        Err(err.into())
    }

    async fn statuses(&self) -> Result<Vec<PullRequestStatus>, PullRequestError> {
        Ok(self.snapshot()?.statuses.clone())
    }

    fn is_draft(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.pull.draft)
    }

    fn is_merged(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.pull.merged)
    }

    fn is_mergeable(&self) -> bool {
        self.snapshot
            .as_ref()
            .is_some_and(|s| s.pull.mergeable.unwrap_or(false))
    }

    fn approved(&self) -> bool {
        self.snapshot.as_ref().is_some_and(|s| s.approved)
    }

    fn base(&self) -> &str {
        self.snapshot
            .as_ref()
            .map_or("", |s| s.pull.base.ref_field.as_str())
    }

    fn behind_by(&self) -> u64 {
        self.snapshot.as_ref().map_or(0, |s| s.behind_by)
    }

    fn head_sha(&self) -> &str {
        self.snapshot
            .as_ref()
            .map_or(UNKNOWN_SHA, |s| s.pull.head.sha.as_str())
    }

    async fn close(&mut self) -> Result<(), PullRequestError> {
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.checkout.close()?;
        }
        Ok(())
    }
}

/// Creates [`GitHubPullRequestClient`]s sharing one octocrab instance.
#[derive(Clone)]
pub struct GitHubClientSource {
    octocrab: Octocrab,
    token: String,
}

impl GitHubClientSource {
    pub fn new(octocrab: Octocrab, token: impl Into<String>) -> Self {
        GitHubClientSource {
            octocrab,
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for GitHubClientSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClientSource").finish_non_exhaustive()
    }
}

impl PullRequestClientSource for GitHubClientSource {
    type Client = GitHubPullRequestClient;

    fn client_for(&self, repo: &RepoId, pr: PrNumber) -> GitHubPullRequestClient {
        GitHubPullRequestClient::new(self.octocrab.clone(), self.token.clone(), repo.clone(), pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_payloads_deserialize() {
        let pull: RawPull = serde_json::from_str(
            r#"{
                "head": {"ref": "feature", "sha": "abc123", "label": "o:feature"},
                "base": {"ref": "master", "sha": "def456"},
                "draft": true,
                "merged": false,
                "mergeable": null
            }"#,
        )
        .unwrap();
        assert_eq!(pull.head.ref_field, "feature");
        assert_eq!(pull.base.ref_field, "master");
        assert!(pull.draft);
        assert_eq!(pull.mergeable, None);

        let combined: RawCombinedStatus = serde_json::from_str(
            r#"{
                "state": "failure",
                "statuses": [
                    {"context": "ci", "state": "failure", "description": null},
                    {"context": "kubeapply/diff (stage)", "state": "success",
                     "description": "Successfully ran for clusters 1a2b3c4d"}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(combined.statuses.len(), 2);
        assert_eq!(combined.statuses[0].state, StatusState::Failure);
        assert_eq!(combined.statuses[0].description, None);

        let comparison: RawComparison =
            serde_json::from_str(r#"{"ahead_by": 2, "behind_by": 5}"#).unwrap();
        assert_eq!(comparison.behind_by, 5);
    }

    #[tokio::test]
    async fn accessors_before_init() {
        let mut client = GitHubPullRequestClient::new(
            Octocrab::default(),
            "token",
            RepoId::new("o", "r"),
            PrNumber(7),
        );
        assert_eq!(client.head_sha(), UNKNOWN_SHA);
        assert_eq!(client.base(), "");
        assert_eq!(client.behind_by(), 0);
        assert!(!client.is_draft());
        assert!(!client.approved());
        assert!(matches!(
            client.statuses().await,
            Err(PullRequestError::NotInitialized)
        ));
        assert!(matches!(
            client.covered_clusters("stage", &[], None).await,
            Err(PullRequestError::NotInitialized)
        ));
        client.close().await.unwrap();
    }
}
