//! Cluster collaborators: the operations run against one Kubernetes cluster.
//!
//! The handler only talks to clusters through [`ClusterClient`], created per
//! request by a [`ClusterClientFactory`]. The production implementation shells
//! out to `kubectl` ([`KubectlClient`]); tests use in-memory fakes.

pub mod kubectl;
mod results;

use std::fmt;
use std::future::Future;
use std::path::PathBuf;

use crate::config::ClusterConfig;
use crate::types::Sha;

pub use kubectl::{KubectlClient, KubectlError, KubectlFactory};
pub use results::{
    ApplyResult, DiffResult, KubeMetadata, KubeObject, diff_counts, kube_json_to_objects,
    objects_to_results, sort_apply_results, split_unified_diff,
};

/// Everything needed to build a client for one cluster.
#[derive(Debug, Clone)]
pub struct ClusterClientConfig {
    pub cluster_config: ClusterConfig,
    /// The pull request head, for labelling what is being applied.
    pub head_sha: Sha,
    pub debug: bool,
}

/// Operations against a single cluster.
///
/// Paths are absolute manifest directories, usually the cluster's
/// [`ClusterConfig::abs_subpaths`].
pub trait ClusterClient {
    /// The error type returned by this client.
    type Error: fmt::Display + Send + Sync + 'static;

    /// Applies the manifests and returns the raw tool output.
    fn apply(&self, paths: &[PathBuf])
    -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Applies the manifests and reports what changed per resource.
    fn apply_structured(
        &self,
        paths: &[PathBuf],
    ) -> impl Future<Output = Result<Vec<ApplyResult>, Self::Error>> + Send;

    /// Diffs the manifests against the live cluster and returns the raw diff.
    fn diff(&self, paths: &[PathBuf]) -> impl Future<Output = Result<String, Self::Error>> + Send;

    /// Diffs the manifests against the live cluster, one result per changed resource.
    fn diff_structured(
        &self,
        paths: &[PathBuf],
    ) -> impl Future<Output = Result<Vec<DiffResult>, Self::Error>> + Send;

    /// A human-readable summary of the workloads in the cluster.
    fn summary(&self) -> impl Future<Output = Result<String, Self::Error>> + Send;

    fn config(&self) -> &ClusterConfig;

    /// Releases anything the client holds.
    fn close(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Builds cluster clients.
pub trait ClusterClientFactory {
    type Client: ClusterClient + Send + Sync;
    type Error: fmt::Display + Send + Sync + 'static;

    fn create(
        &self,
        config: ClusterClientConfig,
    ) -> impl Future<Output = Result<Self::Client, Self::Error>> + Send;
}
