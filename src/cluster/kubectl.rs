//! A [`ClusterClient`] that shells out to `kubectl`.

use std::path::PathBuf;
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

use super::results::{
    kube_json_to_objects, objects_to_results, sort_apply_results, split_unified_diff,
};
use super::{ApplyResult, ClusterClient, ClusterClientConfig, ClusterClientFactory, DiffResult};
use crate::config::ClusterConfig;
use crate::types::Sha;

/// Workload kinds listed by [`KubectlClient::summary`].
const SUMMARY_KINDS: &str = "deployments,statefulsets,daemonsets,cronjobs";

/// Errors from running kubectl.
#[derive(Debug, Error)]
pub enum KubectlError {
    #[error("failed to run {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("kubectl {command} failed with {status}: {output}")]
    CommandFailed {
        command: String,
        status: String,
        output: String,
    },

    #[error("kubectl response does not appear to contain JSON: {0}")]
    NotJson(String),

    #[error("could not unmarshal kubectl JSON response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("did not get a kind from kubectl response root object")]
    MissingKind,

    #[error("kube-system namespace has UID {actual}, expected {expected}; refusing to use cluster {cluster}")]
    UidMismatch {
        cluster: String,
        expected: String,
        actual: String,
    },
}

/// Creates [`KubectlClient`]s.
#[derive(Debug, Clone)]
pub struct KubectlFactory {
    kubectl: PathBuf,
    default_kube_config: Option<PathBuf>,
}

impl KubectlFactory {
    /// `kubectl` is the binary to run; `default_kube_config` is used for
    /// clusters whose config does not name one.
    pub fn new(kubectl: impl Into<PathBuf>, default_kube_config: Option<PathBuf>) -> Self {
        KubectlFactory {
            kubectl: kubectl.into(),
            default_kube_config,
        }
    }
}

impl ClusterClientFactory for KubectlFactory {
    type Client = KubectlClient;
    type Error = KubectlError;

    async fn create(&self, config: ClusterClientConfig) -> Result<KubectlClient, KubectlError> {
        let kube_config = if config.cluster_config.kube_config_path.is_empty() {
            self.default_kube_config.clone()
        } else {
            Some(PathBuf::from(&config.cluster_config.kube_config_path))
        };

        let client = KubectlClient {
            kubectl: self.kubectl.clone(),
            kube_config,
            cluster_config: config.cluster_config,
            head_sha: config.head_sha,
            debug: config.debug,
        };
        if !client.cluster_config.uid.is_empty() {
            client.check_uid().await?;
        }
        Ok(client)
    }
}

/// Runs kubectl against the cluster named by a [`ClusterConfig`].
#[derive(Debug, Clone)]
pub struct KubectlClient {
    kubectl: PathBuf,
    kube_config: Option<PathBuf>,
    cluster_config: ClusterConfig,
    head_sha: Sha,
    debug: bool,
}

impl KubectlClient {
    /// Arguments common to every invocation, followed by `args`.
    fn args<'a>(&self, args: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        let mut all = Vec::new();
        if let Some(path) = &self.kube_config {
            all.push("--kubeconfig".to_string());
            all.push(path.display().to_string());
        }
        all.extend(args.into_iter().map(str::to_string));
        if self.debug {
            all.push("-v=4".to_string());
        }
        all
    }

    /// `-R -f <path>` for every path, plus `--server-side` when the cluster uses it.
    fn manifest_args(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut args = vec!["-R".to_string()];
        for path in paths {
            args.push("-f".to_string());
            args.push(path.display().to_string());
        }
        if self.cluster_config.server_side_apply {
            args.push("--server-side".to_string());
        }
        args
    }

    async fn run(&self, args: &[String]) -> Result<Output, KubectlError> {
        info!(
            cluster = %self.cluster_config.descriptive_name(),
            sha = %self.head_sha.short(),
            args = ?args,
            "running kubectl"
        );

        Command::new(&self.kubectl)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| KubectlError::Spawn {
                program: self.kubectl.clone(),
                source,
            })
    }

    /// Runs kubectl and returns stdout, failing on a non-zero exit.
    async fn run_checked(&self, args: &[String]) -> Result<String, KubectlError> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(command_failed(args, &output))
        }
    }

    /// Fails unless the `kube-system` namespace has the UID the cluster config expects.
    async fn check_uid(&self) -> Result<(), KubectlError> {
        let args = self.args([
            "get",
            "namespace",
            "kube-system",
            "-o",
            "jsonpath={.metadata.uid}",
        ]);
        let actual = self.run_checked(&args).await?.trim().to_string();
        let expected = &self.cluster_config.uid;

        if actual != *expected {
            return Err(KubectlError::UidMismatch {
                cluster: self.cluster_config.descriptive_name(),
                expected: expected.clone(),
                actual,
            });
        }
        debug!(cluster = %self.cluster_config.descriptive_name(), "kube-system UID matches");
        Ok(())
    }

    async fn apply_json(&self, paths: &[PathBuf], dry_run: bool) -> Result<String, KubectlError> {
        let mut tail = self.manifest_args(paths);
        if dry_run {
            tail.push("--dry-run=server".to_string());
        }
        tail.extend(["-o".to_string(), "json".to_string()]);
        let args = self.args(["apply"].into_iter().chain(tail.iter().map(String::as_str)));
        self.run_checked(&args).await
    }

    /// Runs `kubectl diff`; exit status 1 means differences were found.
    async fn run_diff(&self, paths: &[PathBuf]) -> Result<String, KubectlError> {
        let tail = self.manifest_args(paths);
        let args = self.args(["diff"].into_iter().chain(tail.iter().map(String::as_str)));
        let output = self.run(&args).await?;

        match output.status.code() {
            Some(0) | Some(1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(command_failed(&args, &output)),
        }
    }
}

fn command_failed(args: &[String], output: &Output) -> KubectlError {
    let mut combined = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if combined.is_empty() {
        combined = String::from_utf8_lossy(&output.stdout).trim().to_string();
    }
    KubectlError::CommandFailed {
        command: args.join(" "),
        status: output.status.to_string(),
        output: combined,
    }
}

impl ClusterClient for KubectlClient {
    type Error = KubectlError;

    async fn apply(&self, paths: &[PathBuf]) -> Result<String, KubectlError> {
        let tail = self.manifest_args(paths);
        let args = self.args(["apply"].into_iter().chain(tail.iter().map(String::as_str)));
        self.run_checked(&args).await
    }

    async fn apply_structured(&self, paths: &[PathBuf]) -> Result<Vec<ApplyResult>, KubectlError> {
        let old_objects = kube_json_to_objects(&self.apply_json(paths, true).await?)?;
        let new_objects = kube_json_to_objects(&self.apply_json(paths, false).await?)?;

        let mut results = objects_to_results(&old_objects, &new_objects);
        sort_apply_results(&mut results);
        Ok(results)
    }

    async fn diff(&self, paths: &[PathBuf]) -> Result<String, KubectlError> {
        self.run_diff(paths).await
    }

    async fn diff_structured(&self, paths: &[PathBuf]) -> Result<Vec<DiffResult>, KubectlError> {
        let raw = self.run_diff(paths).await?;
        let results = split_unified_diff(&raw);
        debug!(
            cluster = %self.cluster_config.descriptive_name(),
            resources = results.len(),
            "diff finished"
        );
        Ok(results)
    }

    async fn summary(&self) -> Result<String, KubectlError> {
        let args = self.args(["get", SUMMARY_KINDS, "--all-namespaces", "-o", "wide"]);
        self.run_checked(&args).await
    }

    fn config(&self) -> &ClusterConfig {
        &self.cluster_config
    }

    async fn close(&self) -> Result<(), KubectlError> {
        Ok(())
    }
}
