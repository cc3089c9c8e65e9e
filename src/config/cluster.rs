//! Cluster configuration files.
//!
//! A cluster config is a YAML file somewhere in the repository describing one
//! Kubernetes cluster in one region of one environment. The engine finds them by
//! walking the checkout, so loading is lenient about which files it is handed:
//! anything that does not look like a cluster config is reported as
//! [`ConfigError::NotAClusterConfig`] and the caller skips it.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Subpath meaning "everything under the expanded root".
pub const ROOT_SUBPATH: &str = ".";

/// Errors from loading a cluster config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("file {} is not a valid cluster config", .path.display())]
    NotAClusterConfig { path: PathBuf },

    #[error("{field} must be set in {}", .path.display())]
    MissingField { field: &'static str, path: PathBuf },
}

/// Configuration for a single Kubernetes cluster in a single region and environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Name of the cluster. Required.
    #[serde(default)]
    pub cluster: String,

    /// Region for this cluster, e.g. `us-west-2`. Required.
    #[serde(default)]
    pub region: String,

    /// Environment or account for this cluster, e.g. `production`. Required.
    #[serde(default)]
    pub env: String,

    /// Expected UID of the `kube-system` namespace. When set, the kubectl client
    /// refuses to start against a cluster whose namespace UID differs.
    #[serde(default)]
    pub uid: String,

    /// Default location of Helm charts for the expansion pipeline.
    #[serde(default)]
    pub charts: String,

    /// Profile (template) directory. Defaults to `profile` next to the config.
    #[serde(default)]
    pub profile_path: String,

    /// Rendered manifests. Defaults to `expanded/{env}/{region}` next to the config.
    #[serde(default)]
    pub expanded_path: String,

    /// Free-form template parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_yaml::Value>,

    /// Webhooks skip this cluster entirely when set.
    #[serde(default, rename = "ignore")]
    pub github_ignore: bool,

    /// Kubeconfig to use with this cluster instead of the server default.
    #[serde(default, rename = "kubeConfig")]
    pub kube_config_path: String,

    /// Run applies and diffs with `--server-side`.
    #[serde(default)]
    pub server_side_apply: bool,

    /// Subpaths of `expanded_path` that operations are scoped to.
    ///
    /// Rewritten by the coverage resolver on every request.
    #[serde(skip, default = "default_subpaths")]
    pub subpaths: Vec<String>,

    #[serde(skip)]
    full_path: PathBuf,

    #[serde(skip)]
    rel_path: PathBuf,
}

fn default_subpaths() -> Vec<String> {
    vec![ROOT_SUBPATH.to_string()]
}

impl ClusterConfig {
    /// Creates a config with only the identifying fields set.
    ///
    /// Call [`ClusterConfig::set_defaults`] afterwards to fill in paths.
    pub fn new(
        cluster: impl Into<String>,
        region: impl Into<String>,
        env: impl Into<String>,
    ) -> Self {
        ClusterConfig {
            cluster: cluster.into(),
            region: region.into(),
            env: env.into(),
            uid: String::new(),
            charts: String::new(),
            profile_path: String::new(),
            expanded_path: String::new(),
            parameters: BTreeMap::new(),
            github_ignore: false,
            kube_config_path: String::new(),
            server_side_apply: false,
            subpaths: default_subpaths(),
            full_path: PathBuf::new(),
            rel_path: PathBuf::new(),
        }
    }

    /// Loads a config from disk. `root` is the repository root used for [`ClusterConfig::rel_path`].
    pub fn load(path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents, path, root)
    }

    /// Parses a config from YAML that was read from `path`.
    pub fn from_yaml(contents: &str, path: &Path, root: &Path) -> Result<Self, ConfigError> {
        let mut config: ClusterConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;

        if config.cluster.is_empty() {
            return Err(ConfigError::NotAClusterConfig {
                path: path.to_path_buf(),
            });
        }

        config.set_defaults(path, root)?;
        Ok(config)
    }

    /// Fills in derived paths and defaults for a config located at `path`.
    ///
    /// Relative `profilePath` / `expandedPath` values are resolved against the
    /// directory containing the config.
    pub fn set_defaults(&mut self, path: &Path, root: &Path) -> Result<(), ConfigError> {
        if self.env.is_empty() {
            return Err(ConfigError::MissingField {
                field: "env",
                path: path.to_path_buf(),
            });
        }
        if self.region.is_empty() {
            return Err(ConfigError::MissingField {
                field: "region",
                path: path.to_path_buf(),
            });
        }

        self.full_path = path.to_path_buf();
        self.rel_path = path
            .strip_prefix(root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| path.to_path_buf());
        self.subpaths = default_subpaths();

        let config_dir = path.parent().unwrap_or_else(|| Path::new(""));

        if self.profile_path.is_empty() {
            self.profile_path = path_string(&config_dir.join("profile"));
            debug!(profile_path = %self.profile_path, "profilePath not set, using default");
        } else if Path::new(&self.profile_path).is_relative() {
            self.profile_path = path_string(&config_dir.join(&self.profile_path));
        }

        if self.expanded_path.is_empty() {
            self.expanded_path = path_string(
                &config_dir
                    .join("expanded")
                    .join(&self.env)
                    .join(&self.region),
            );
            debug!(expanded_path = %self.expanded_path, "expandedPath not set, using default");
        } else if Path::new(&self.expanded_path).is_relative() {
            self.expanded_path = path_string(&config_dir.join(&self.expanded_path));
        }

        Ok(())
    }

    /// The `env:region:cluster` name used in selectors, comments and status hashes.
    pub fn descriptive_name(&self) -> String {
        format!("{}:{}:{}", self.env, self.region, self.cluster)
    }

    /// Path to the config file as it was loaded.
    pub fn full_path(&self) -> &Path {
        &self.full_path
    }

    /// Path to the config file relative to the repository root.
    pub fn rel_path(&self) -> &Path {
        &self.rel_path
    }

    /// Absolute (or checkout-relative) paths of each subpath under the expanded root.
    ///
    /// The root subpath maps to the expanded root itself.
    pub fn abs_subpaths(&self) -> Vec<PathBuf> {
        let expanded = Path::new(&self.expanded_path);
        self.subpaths
            .iter()
            .map(|subpath| {
                if subpath == ROOT_SUBPATH {
                    expanded.to_path_buf()
                } else {
                    expanded.join(subpath)
                }
            })
            .collect()
    }

    /// Markdown rendering of the subpaths for comments.
    pub fn pretty_subpaths(&self) -> String {
        self.subpaths
            .iter()
            .map(|subpath| {
                if subpath == ROOT_SUBPATH {
                    "*all*".to_string()
                } else {
                    format!("`{}`", subpath)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
