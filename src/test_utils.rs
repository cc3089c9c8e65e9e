//! Shared test utilities: in-memory collaborators and proptest generators.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use proptest::prelude::*;
use thiserror::Error;

use crate::cluster::{
    ApplyResult, ClusterClient, ClusterClientConfig, ClusterClientFactory, DiffResult,
};
use crate::config::ClusterConfig;
use crate::pullreq::{PullRequestClient, PullRequestClientSource, PullRequestStatus};
use crate::status::StatusState;
use crate::types::{PrNumber, RepoId};

/// Error returned by the fakes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct FakeError(pub String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ============================================================================
// Clusters
// ============================================================================

/// Three clusters under `/git/repo/clusters`, two of them in `test-env`.
pub fn test_cluster_configs() -> Vec<ClusterConfig> {
    [
        ("test-cluster1", "test-env"),
        ("test-cluster2", "test-env"),
        ("test-cluster3", "test-env2"),
    ]
    .into_iter()
    .map(|(cluster, env)| {
        let mut config = ClusterConfig::new(cluster, "test-region", env);
        config.expanded_path = "expanded".to_string();
        config
            .set_defaults(
                &Path::new("/git/repo/clusters").join(format!("{cluster}.yaml")),
                Path::new("/git/repo"),
            )
            .expect("test config is valid");
        config
    })
    .collect()
}

/// Cluster client returning canned results. Every call is appended to a log
/// shared with the factory that created it.
#[derive(Debug)]
pub struct FakeClusterClient {
    config: ClusterConfig,
    kubectl_error: bool,
    delay: Duration,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeClusterClient {
    fn record(&self, call: &str) {
        lock(&self.calls).push(format!("{} {}", call, self.config.cluster));
    }

    /// Waits out the configured delay, then fails if the factory asked for errors.
    async fn check(&self) -> Result<(), FakeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.kubectl_error {
            Err(FakeError("kubectl error".to_string()))
        } else {
            Ok(())
        }
    }
}

fn joined_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl ClusterClient for FakeClusterClient {
    type Error = FakeError;

    async fn apply(&self, paths: &[PathBuf]) -> Result<String, FakeError> {
        self.record("apply");
        self.check().await?;
        Ok(format!(
            "apply result for {} with paths [{}]",
            self.config.cluster,
            joined_paths(paths)
        ))
    }

    async fn apply_structured(&self, paths: &[PathBuf]) -> Result<Vec<ApplyResult>, FakeError> {
        self.record("apply_structured");
        self.check().await?;
        Ok(vec![ApplyResult {
            kind: "Deployment".to_string(),
            name: format!(
                "apply result for {} with paths [{}]",
                self.config.cluster,
                joined_paths(paths)
            ),
            namespace: "test-namespace".to_string(),
            created_at: None,
            old_version: "1234".to_string(),
            new_version: "5678".to_string(),
        }])
    }

    async fn diff(&self, _paths: &[PathBuf]) -> Result<String, FakeError> {
        self.record("diff");
        self.check().await?;
        Ok(format!("diff result for {}", self.config.cluster))
    }

    async fn diff_structured(&self, _paths: &[PathBuf]) -> Result<Vec<DiffResult>, FakeError> {
        self.record("diff_structured");
        self.check().await?;
        Ok(vec![DiffResult::new(
            "result",
            format!("structured diff result for {}", self.config.cluster),
        )])
    }

    async fn summary(&self) -> Result<String, FakeError> {
        self.record("summary");
        self.check().await?;
        Ok(format!("summary {}", self.config.cluster))
    }

    fn config(&self) -> &ClusterConfig {
        &self.config
    }

    async fn close(&self) -> Result<(), FakeError> {
        self.record("close");
        Ok(())
    }
}

/// Factory for [`FakeClusterClient`]s.
#[derive(Debug, Clone, Default)]
pub struct FakeClusterFactory {
    /// Every client operation fails with `kubectl error`.
    pub kubectl_error: bool,
    /// `create` fails with this message.
    pub create_error: Option<String>,
    /// Every client operation sleeps this long before answering.
    pub delay: Duration,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl FakeClusterFactory {
    pub fn failing() -> Self {
        FakeClusterFactory {
            kubectl_error: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

impl ClusterClientFactory for FakeClusterFactory {
    type Client = FakeClusterClient;
    type Error = FakeError;

    async fn create(&self, config: ClusterClientConfig) -> Result<FakeClusterClient, FakeError> {
        if let Some(message) = &self.create_error {
            return Err(FakeError(message.clone()));
        }
        Ok(FakeClusterClient {
            config: config.cluster_config,
            kubectl_error: self.kubectl_error,
            delay: self.delay,
            calls: Arc::clone(&self.calls),
        })
    }
}

// ============================================================================
// Pull requests
// ============================================================================

/// In-memory pull request.
///
/// Comments are recorded as `Normal comment: <body>` or
/// `Error comment: <message>`; statuses are replaced by context.
#[derive(Debug, Default)]
pub struct FakePullRequestClient {
    pub clusters: Vec<ClusterConfig>,
    pub approved: bool,
    pub behind_by: u64,
    pub draft: bool,
    pub merged: bool,
    pub mergeable: bool,
    pub init_error: Option<String>,
    pub initialized: bool,
    pub closed: bool,
    pub comments: Mutex<Vec<String>>,
    pub statuses: Mutex<Vec<PullRequestStatus>>,
    pub merges: Mutex<usize>,
}

impl FakePullRequestClient {
    /// An approved, mergeable pull request covering `clusters`.
    pub fn new(clusters: Vec<ClusterConfig>) -> Self {
        FakePullRequestClient {
            clusters,
            approved: true,
            mergeable: true,
            ..Default::default()
        }
    }

    pub fn with_statuses(self, statuses: Vec<PullRequestStatus>) -> Self {
        *lock(&self.statuses) = statuses;
        self
    }

    pub fn comments(&self) -> Vec<String> {
        lock(&self.comments).clone()
    }

    pub fn recorded_statuses(&self) -> Vec<PullRequestStatus> {
        lock(&self.statuses).clone()
    }

    /// The state of the status with `context`, if one was written.
    pub fn status_state(&self, context: &str) -> Option<StatusState> {
        lock(&self.statuses)
            .iter()
            .find(|s| s.context == context)
            .map(|s| s.state)
    }

    pub fn merge_count(&self) -> usize {
        *lock(&self.merges)
    }
}

impl PullRequestClient for FakePullRequestClient {
    type Error = FakeError;

    async fn init(&mut self) -> Result<(), FakeError> {
        if let Some(message) = &self.init_error {
            return Err(FakeError(message.clone()));
        }
        self.initialized = true;
        Ok(())
    }

    async fn covered_clusters(
        &self,
        env: &str,
        selectors: &[String],
        subpath_override: Option<&str>,
    ) -> Result<Vec<ClusterConfig>, FakeError> {
        Ok(self
            .clusters
            .iter()
            .filter(|c| selectors.is_empty() || selectors.contains(&c.descriptive_name()))
            .filter(|c| env.is_empty() || c.env == env)
            .map(|c| {
                let mut config = c.clone();
                config.subpaths = vec![subpath_override.unwrap_or(".").to_string()];
                config
            })
            .collect())
    }

    async fn post_comment(&self, body: &str) -> Result<(), FakeError> {
        lock(&self.comments).push(format!("Normal comment: {body}"));
        Ok(())
    }

    async fn post_error_comment(&self, _env: &str, message: &str) -> Result<(), FakeError> {
        lock(&self.comments).push(format!("Error comment: {message}"));
        Ok(())
    }

    async fn update_status(
        &self,
        state: StatusState,
        context: &str,
        description: &str,
        _url: &str,
    ) -> Result<(), FakeError> {
        let mut statuses = lock(&self.statuses);
        match statuses.iter_mut().find(|s| s.context == context) {
            Some(existing) => {
                existing.state = state;
                existing.description = description.to_string();
            }
            None => statuses.push(PullRequestStatus::new(context, description, state)),
        }
        Ok(())
    }

    async fn merge(&self) -> Result<(), FakeError> {
        *lock(&self.merges) += 1;
        Ok(())
    }

    async fn statuses(&self) -> Result<Vec<PullRequestStatus>, FakeError> {
        Ok(self.recorded_statuses())
    }

    fn is_draft(&self) -> bool {
        self.draft
    }

    fn is_merged(&self) -> bool {
        self.merged || self.merge_count() > 0
    }

    fn is_mergeable(&self) -> bool {
        self.mergeable
    }

    fn approved(&self) -> bool {
        self.approved
    }

    fn base(&self) -> &str {
        "master"
    }

    fn behind_by(&self) -> u64 {
        self.behind_by
    }

    fn head_sha(&self) -> &str {
        "test-sha"
    }

    async fn close(&mut self) -> Result<(), FakeError> {
        self.closed = true;
        Ok(())
    }
}

/// Hands out a fresh [`FakePullRequestClient`] over the same clusters for
/// every pull request.
#[derive(Debug, Clone, Default)]
pub struct FakeClientSource {
    pub clusters: Vec<ClusterConfig>,
}

impl PullRequestClientSource for FakeClientSource {
    type Client = FakePullRequestClient;

    fn client_for(&self, _repo: &RepoId, _pr: PrNumber) -> FakePullRequestClient {
        FakePullRequestClient::new(self.clusters.clone())
    }
}

// ============================================================================
// Generators
// ============================================================================

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (1..100_000u64).prop_map(PrNumber)
}

pub fn arb_repo_id() -> impl Strategy<Value = RepoId> {
    ("[a-z][a-z0-9-]{0,20}", "[a-z][a-z0-9_.-]{0,30}").prop_map(|(o, r)| RepoId::new(o, r))
}

/// Comment bodies mixing commands, apply results and chatter.
pub fn arb_comment_body() -> impl Strategy<Value = String> {
    prop_oneof![
        "[ a-zA-Z0-9:*-]{0,40}".prop_map(|rest| format!("kubeapply {rest}")),
        "[ a-zA-Z0-9]{0,40}".prop_map(|rest| format!("## 🤖 Kubeapply apply result (stage) 🤖\n{rest}")),
        "[ a-zA-Z0-9\n]{0,60}",
    ]
}
