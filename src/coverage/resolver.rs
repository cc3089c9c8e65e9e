//! Resolution of the clusters covered by a set of changed files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::ClusterConfig;

use super::parents::{lowest_parents, relative_path};

/// Errors from resolving covered clusters.
#[derive(Debug, Error)]
pub enum CoverageError {
    #[error("invalid cluster selector {selector:?}: {source}")]
    InvalidSelector {
        selector: String,
        #[source]
        source: globset::Error,
    },

    #[error("error walking {}: {source}", .root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Returns every cluster covered by a change, each scoped to its computed subpaths.
///
/// # Arguments
///
/// * `repo_root` - Root of a checkout of the pull request head
/// * `changed_files` - Paths changed by the pull request, relative to `repo_root`
/// * `env` - Only clusters in this environment are considered (empty for all)
/// * `selectors` - Globs matched against `env:region:cluster`; when non-empty,
///   only matching clusters are considered and they are kept even if unchanged
/// * `subpath_override` - Used verbatim as the single subpath of every cluster
///
/// When any selector contains a wildcard, selected clusters with no changed
/// files are dropped so a broad glob never triggers no-op operations.
///
/// Results are sorted by the config file's path relative to `repo_root`.
pub fn resolve_covered_clusters(
    repo_root: &Path,
    changed_files: &[String],
    env: &str,
    selectors: &[String],
    subpath_override: Option<&str>,
) -> Result<Vec<ClusterConfig>, CoverageError> {
    let selector_set = compile_selectors(selectors)?;

    // Keyed by config path relative to the repo root, which also fixes the output order.
    let mut configs: BTreeMap<String, ClusterConfig> = BTreeMap::new();
    let mut changed: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut owners: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for config in find_cluster_configs(repo_root)? {
        let name = config.descriptive_name();

        if let Some(set) = &selector_set
            && !set.is_match(&name)
        {
            debug!(cluster = %name, "ignoring cluster not matched by selectors");
            continue;
        }
        if config.github_ignore {
            info!(cluster = %name, "ignoring cluster because ignore is set");
            continue;
        }
        if !env.is_empty() && config.env != env {
            debug!(cluster = %name, env, "ignoring cluster in other env");
            continue;
        }

        let key = slash_string(config.rel_path());
        for file in expanded_files(repo_root, &config)? {
            owners.entry(file).or_default().push(key.clone());
        }
        if selector_set.is_some() {
            changed.insert(key.clone(), Vec::new());
        }
        configs.insert(key, config);
    }

    for file in changed_files {
        if let Some(config_keys) = owners.get(file) {
            for key in config_keys {
                changed.entry(key.clone()).or_default().push(file.clone());
            }
        }
    }

    if selectors.iter().any(|s| has_wildcard(s)) {
        changed.retain(|key, files| {
            if files.is_empty() {
                info!(config = %key, "removing cluster because it has no changes");
            }
            !files.is_empty()
        });
    }

    let mut covered = Vec::with_capacity(changed.len());
    for (key, files) in changed {
        let Some(mut config) = configs.remove(&key) else {
            continue;
        };

        config.subpaths = match subpath_override {
            Some(subpath) => vec![subpath.to_string()],
            None => {
                let rel_expanded = relative_path(repo_root, Path::new(&config.expanded_path));
                lowest_parents(&rel_expanded, &files)
            }
        };

        info!(
            cluster = %config.descriptive_name(),
            subpaths = ?config.subpaths,
            "cluster is covered"
        );
        covered.push(config);
    }

    Ok(covered)
}

fn compile_selectors(selectors: &[String]) -> Result<Option<GlobSet>, CoverageError> {
    if selectors.is_empty() {
        return Ok(None);
    }

    let mut builder = GlobSetBuilder::new();
    for selector in selectors {
        let glob = Glob::new(selector).map_err(|source| CoverageError::InvalidSelector {
            selector: selector.clone(),
            source,
        })?;
        builder.add(glob);
    }

    builder
        .build()
        .map(Some)
        .map_err(|source| CoverageError::InvalidSelector {
            selector: selectors.join(" "),
            source,
        })
}

/// Whether `selector` uses any glob metacharacter: `*`, `?` or a `[...]` class.
///
/// All three widen a selector to clusters that may be unchanged, so each one
/// triggers the drop of selected clusters with no changed files.
fn has_wildcard(selector: &str) -> bool {
    selector.contains(['*', '?', '['])
}

/// Walks the checkout for YAML files that load as cluster configs.
///
/// Any YAML file mentioning `cluster:` is a candidate; candidates that fail to
/// load are skipped since plenty of manifests mention clusters.
fn find_cluster_configs(repo_root: &Path) -> Result<Vec<ClusterConfig>, CoverageError> {
    let mut configs = Vec::new();

    let walker = WalkDir::new(repo_root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|source| CoverageError::Walk {
            root: repo_root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() || !is_yaml(entry.path()) {
            continue;
        }

        let bytes = fs::read(entry.path()).map_err(|source| CoverageError::Io {
            path: entry.path().to_path_buf(),
            source,
        })?;
        let Ok(contents) = String::from_utf8(bytes) else {
            continue;
        };
        if !contents.contains("cluster:") {
            continue;
        }

        match ClusterConfig::from_yaml(&contents, entry.path(), repo_root) {
            Ok(config) => {
                debug!(path = %entry.path().display(), "found cluster config");
                configs.push(config);
            }
            Err(e) => {
                debug!(path = %entry.path().display(), error = %e, "not a cluster config");
            }
        }
    }

    Ok(configs)
}

/// Lists every file under a cluster's expanded root, relative to `repo_root`.
fn expanded_files(repo_root: &Path, config: &ClusterConfig) -> Result<Vec<String>, CoverageError> {
    let expanded = Path::new(&config.expanded_path);
    if !expanded.is_dir() {
        debug!(
            cluster = %config.descriptive_name(),
            expanded_path = %config.expanded_path,
            "expanded path does not exist"
        );
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(expanded).follow_links(false) {
        let entry = entry.map_err(|source| CoverageError::Walk {
            root: expanded.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() {
            files.push(slash_string(&relative_path(repo_root, entry.path())));
        }
    }
    Ok(files)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml" | "yml")
    )
}

fn slash_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Lays out a repository with three clusters:
    ///
    /// - `stage:us-west-2:cluster1` expanded under `clusters/clustertype/expanded/cluster1`
    /// - `stage:us-west-2:cluster2` expanded under `clusters/clustertype/expanded/cluster2`
    /// - `production:us-west-2:cluster3` expanded under `clusters/clustertype/expanded/cluster3`
    fn fixture_repo() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let files: &[(&str, &str)] = &[
            (
                "clusters/clustertype/cluster1.yaml",
                "cluster: cluster1\nregion: us-west-2\nenv: stage\nexpandedPath: expanded/cluster1\n",
            ),
            (
                "clusters/clustertype/cluster2.yaml",
                "cluster: cluster2\nregion: us-west-2\nenv: stage\nexpandedPath: expanded/cluster2\n",
            ),
            (
                "clusters/clustertype/cluster3.yaml",
                "cluster: cluster3\nregion: us-west-2\nenv: production\nexpandedPath: expanded/cluster3\n",
            ),
            (
                "clusters/clustertype/ignored.yaml",
                "cluster: ignored\nregion: us-west-2\nenv: stage\nignore: true\nexpandedPath: expanded/cluster1\n",
            ),
            ("clusters/clustertype/profile/file1.yaml", "kind: ConfigMap\n"),
            ("clusters/clustertype/expanded/cluster1/file1.yaml", "kind: ConfigMap\n"),
            ("clusters/clustertype/expanded/cluster1/subdir1/file3.yaml", "kind: ConfigMap\n"),
            (
                "clusters/clustertype/expanded/cluster1/subdir1/subdir3/file6.yaml",
                "kind: ConfigMap\n",
            ),
            ("clusters/clustertype/expanded/cluster1/subdir2/file4.yaml", "kind: ConfigMap\n"),
            ("clusters/clustertype/expanded/cluster2/file2.yaml", "kind: ConfigMap\n"),
            ("clusters/clustertype/expanded/cluster3/file2.yaml", "kind: ConfigMap\n"),
            ("other/values.yaml", "cluster: not-a-config\n"),
            ("other/expanded/file1.yaml", "kind: ConfigMap\n"),
        ];

        for (path, contents) in files {
            let full = root.join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, contents).unwrap();
        }

        dir
    }

    fn resolve(
        repo: &TempDir,
        changed: &[&str],
        selectors: &[&str],
        subpath_override: Option<&str>,
    ) -> Vec<(String, Vec<String>)> {
        let changed: Vec<String> = changed.iter().map(|s| s.to_string()).collect();
        let selectors: Vec<String> = selectors.iter().map(|s| s.to_string()).collect();
        resolve_covered_clusters(repo.path(), &changed, "", &selectors, subpath_override)
            .unwrap()
            .into_iter()
            .map(|c| (c.descriptive_name(), c.subpaths))
            .collect()
    }

    fn covered(name: &str, subpaths: &[&str]) -> (String, Vec<String>) {
        (
            name.to_string(),
            subpaths.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn no_changes_covers_nothing() {
        let repo = fixture_repo();
        assert!(resolve(&repo, &[], &[], None).is_empty());
    }

    #[test]
    fn changes_outside_expanded_trees_cover_nothing() {
        let repo = fixture_repo();
        assert!(
            resolve(
                &repo,
                &[
                    "clusters/clustertype/cluster1.yaml",
                    "clusters/clustertype/profile/file1.yaml",
                ],
                &[],
                None
            )
            .is_empty()
        );
    }

    #[test]
    fn file_in_expanded_root_covers_everything() {
        let repo = fixture_repo();
        assert_eq!(
            resolve(
                &repo,
                &[
                    "clusters/clustertype/expanded/cluster1/file1.yaml",
                    "clusters/clustertype/expanded/cluster1/subdir1/file3.yaml",
                    "other/expanded/file1.yaml",
                ],
                &[],
                None
            ),
            vec![covered("stage:us-west-2:cluster1", &["."])]
        );
    }

    #[test]
    fn computes_lowest_parents_per_cluster() {
        let repo = fixture_repo();
        assert_eq!(
            resolve(
                &repo,
                &[
                    "clusters/clustertype/expanded/cluster1/subdir1/file3.yaml",
                    "clusters/clustertype/expanded/cluster1/subdir1/subdir3/file6.yaml",
                    "clusters/clustertype/expanded/cluster1/subdir2/file4.yaml",
                    "clusters/clustertype/expanded/cluster2/file2.yaml",
                ],
                &[],
                None
            ),
            vec![
                covered("stage:us-west-2:cluster1", &["subdir1", "subdir2"]),
                covered("stage:us-west-2:cluster2", &["."]),
            ]
        );
    }

    #[test]
    fn explicit_selectors_keep_unchanged_clusters() {
        let repo = fixture_repo();
        assert_eq!(
            resolve(
                &repo,
                &["clusters/clustertype/expanded/cluster1/subdir1/file3.yaml"],
                &["stage:us-west-2:cluster1", "stage:us-west-2:cluster2"],
                None
            ),
            vec![
                covered("stage:us-west-2:cluster1", &["subdir1"]),
                covered("stage:us-west-2:cluster2", &["."]),
            ]
        );
    }

    #[test]
    fn wildcard_selectors_prune_unchanged_clusters() {
        let repo = fixture_repo();
        assert_eq!(
            resolve(
                &repo,
                &["clusters/clustertype/expanded/cluster2/file2.yaml"],
                &["stage:*"],
                None
            ),
            vec![covered("stage:us-west-2:cluster2", &["."])]
        );
    }

    #[test]
    fn single_char_and_class_globs_also_prune() {
        let repo = fixture_repo();
        let changed = ["clusters/clustertype/expanded/cluster2/file2.yaml"];

        for selector in ["stage:us-west-2:cluster?", "stage:us-west-2:cluster[12]"] {
            assert_eq!(
                resolve(&repo, &changed, &[selector], None),
                vec![covered("stage:us-west-2:cluster2", &["."])],
                "{selector}"
            );
        }
        assert!(!has_wildcard("stage:us-west-2:cluster1"));
    }

    #[test]
    fn subpath_override_is_used_verbatim() {
        let repo = fixture_repo();
        assert_eq!(
            resolve(
                &repo,
                &["clusters/clustertype/expanded/cluster1/subdir1/file3.yaml"],
                &["stage:us-west-2:cluster2"],
                Some("path1")
            ),
            vec![covered("stage:us-west-2:cluster2", &["path1"])]
        );
    }

    #[test]
    fn env_filter_applies() {
        let repo = fixture_repo();
        let changed = vec![
            "clusters/clustertype/expanded/cluster2/file2.yaml".to_string(),
            "clusters/clustertype/expanded/cluster3/file2.yaml".to_string(),
        ];

        let stage = resolve_covered_clusters(repo.path(), &changed, "stage", &[], None).unwrap();
        assert_eq!(stage.len(), 1);
        assert_eq!(stage[0].cluster, "cluster2");

        let all = resolve_covered_clusters(repo.path(), &changed, "", &[], None).unwrap();
        let names: Vec<_> = all.iter().map(|c| c.cluster.as_str()).collect();
        assert_eq!(names, vec!["cluster2", "cluster3"]);
    }

    #[test]
    fn ignored_clusters_are_never_covered() {
        let repo = fixture_repo();
        let result = resolve(
            &repo,
            &["clusters/clustertype/expanded/cluster1/file1.yaml"],
            &["stage:us-west-2:ignored"],
            None,
        );
        assert!(result.is_empty());
    }

    #[test]
    fn invalid_selector_is_an_error() {
        let repo = fixture_repo();
        let err =
            resolve_covered_clusters(repo.path(), &[], "", &["stage:[".to_string()], None)
                .unwrap_err();
        assert!(matches!(err, CoverageError::InvalidSelector { .. }));
    }

    #[test]
    fn resolution_is_idempotent() {
        let repo = fixture_repo();
        let changed = vec![
            "clusters/clustertype/expanded/cluster1/subdir1/file3.yaml".to_string(),
            "clusters/clustertype/expanded/cluster1/subdir2/file4.yaml".to_string(),
            "clusters/clustertype/expanded/cluster2/file2.yaml".to_string(),
        ];
        let selectors = vec!["stage:*".to_string()];

        let first =
            resolve_covered_clusters(repo.path(), &changed, "stage", &selectors, None).unwrap();
        let second =
            resolve_covered_clusters(repo.path(), &changed, "stage", &selectors, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn results_sorted_by_config_path() {
        let repo = fixture_repo();
        let result = resolve_covered_clusters(
            repo.path(),
            &[],
            "",
            &["*".to_string(), "stage:us-west-2:cluster1".to_string()],
            None,
        )
        .unwrap();
        // The wildcard prunes every cluster without changes.
        assert!(result.is_empty());

        let result = resolve_covered_clusters(
            repo.path(),
            &[],
            "",
            &[
                "stage:us-west-2:cluster2".to_string(),
                "production:us-west-2:cluster3".to_string(),
                "stage:us-west-2:cluster1".to_string(),
            ],
            None,
        )
        .unwrap();
        let paths: Vec<_> = result.iter().map(|c| slash_string(c.rel_path())).collect();
        assert_eq!(
            paths,
            vec![
                "clusters/clustertype/cluster1.yaml",
                "clusters/clustertype/cluster2.yaml",
                "clusters/clustertype/cluster3.yaml",
            ]
        );
    }
}
