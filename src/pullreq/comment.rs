//! Markdown bodies for the comments the engine posts.

use crate::cluster::{ApplyResult, DiffResult};
use crate::commands::APPLY_RESULT_MARKER;
use crate::config::ClusterConfig;

/// GitHub allows slightly more; the rest is headroom for chunk headers and fences.
pub const GITHUB_MAX_COMMENT_LEN: usize = 63_500;

/// Longest raw diff shown for a single resource.
const MAX_RESOURCE_DIFF_LEN: usize = 20_000;

const DIFF_FENCE: &str = "```diff\n";

/// The results of applying in one cluster.
#[derive(Debug, Clone)]
pub struct ClusterApply {
    pub cluster_config: ClusterConfig,
    pub results: Vec<ApplyResult>,
}

impl ClusterApply {
    /// Resources created or updated by the apply.
    pub fn num_updates(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_created() || r.is_updated())
            .count()
    }
}

/// The results of diffing one cluster.
#[derive(Debug, Clone)]
pub struct ClusterDiff {
    pub cluster_config: ClusterConfig,
    pub results: Vec<DiffResult>,
}

/// The workload summary of one cluster.
#[derive(Debug, Clone)]
pub struct ClusterStatus {
    pub cluster_config: ClusterConfig,
    pub health_summary: String,
}

fn header(title: &str, env: &str) -> String {
    format!("## 🤖 {title} ({env}) 🤖\n")
}

fn cluster_heading(config: &ClusterConfig) -> String {
    format!(
        "#### Cluster: `{}`<br/><br/>Subpaths ({})\n",
        config.descriptive_name(),
        config.pretty_subpaths()
    )
}

/// The comment for a successful `apply`. It always contains [`APPLY_RESULT_MARKER`].
pub fn format_apply_comment(env: &str, applies: &[ClusterApply]) -> String {
    let mut out = header(APPLY_RESULT_MARKER, env);

    for apply in applies {
        out.push('\n');
        out.push_str(&cluster_heading(&apply.cluster_config));
        out.push('\n');

        if apply.results.is_empty() {
            out.push_str("No resources applied.\n");
            continue;
        }

        out.push_str(&format!(
            "{} of {} resources created or updated.\n\n",
            apply.num_updates(),
            apply.results.len()
        ));
        out.push_str("| Kind | Name | Namespace | Created | Old Version | New Version | Change |\n");
        out.push_str("| --- | --- | --- | --- | --- | --- | --- |\n");
        for result in &apply.results {
            let change = if result.is_created() {
                "created"
            } else if result.is_updated() {
                "updated"
            } else {
                "unchanged"
            };
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} | {} | {} |\n",
                result.kind,
                result.name,
                result.namespace,
                result.created_timestamp(),
                result.old_version,
                result.new_version,
                change
            ));
        }
    }

    out.push_str("\n#### Next steps\n\n");
    out.push_str("* Merge your changes\n");
    out.push_str("* To see the current state of the clusters, post `kubeapply status`\n");
    out.trim().to_string()
}

/// The comment for a `diff`, warning when the branch is behind its base.
pub fn format_diff_comment(env: &str, diffs: &[ClusterDiff], base: &str, behind_by: u64) -> String {
    let mut out = header("Kubeapply diff result", env);

    if behind_by > 0 {
        out.push_str(&format!(
            "\n⚠️ This branch is behind `{base}` by {behind_by} commit(s). \
             Please re-merge before applying.\n"
        ));
    }

    for diff in diffs {
        out.push('\n');
        out.push_str(&cluster_heading(&diff.cluster_config));
        out.push('\n');

        if diff.results.is_empty() {
            out.push_str("No diffs found.\n");
            continue;
        }

        out.push_str("| Resource | Added | Removed |\n");
        out.push_str("| --- | --- | --- |\n");
        for result in &diff.results {
            out.push_str(&format!(
                "| `{}` | {} | {} |\n",
                result.name, result.num_added, result.num_removed
            ));
        }

        out.push('\n');
        out.push_str(DIFF_FENCE);
        for result in &diff.results {
            out.push_str(&result.clipped_raw_diff(MAX_RESOURCE_DIFF_LEN));
            out.push('\n');
        }
        out.push_str("```\n");
    }

    out.push_str("\n#### Next steps\n\n");
    out.push_str("* Review the diffs above and push more changes if needed\n");
    out.push_str("* Once approved, apply with `kubeapply apply [cluster ids]`\n");
    out.trim().to_string()
}

/// The comment for a `status` command.
pub fn format_status_comment(env: &str, statuses: &[ClusterStatus]) -> String {
    let mut out = header("Kubeapply cluster status", env);

    for status in statuses {
        out.push('\n');
        out.push_str(&cluster_heading(&status.cluster_config));
        out.push_str("\n```\n");
        out.push_str(status.health_summary.trim_end());
        out.push_str("\n```\n");
    }

    out.trim().to_string()
}

/// Usage for the clusters a pull request covers.
pub fn format_help_comment(env: &str, clusters: &[ClusterConfig]) -> String {
    let mut out = header("Kubeapply help", env);

    out.push_str("\nThis pull request changes the following clusters:\n\n");
    for cluster in clusters {
        out.push_str(&format!(
            "* `{}` (subpaths: {})\n",
            cluster.descriptive_name(),
            cluster.pretty_subpaths()
        ));
    }

    out.push_str(
        "\n#### Commands\n\n\
         * `kubeapply diff [cluster ids] [--subpath=path]`: diff the changes against the clusters\n\
         * `kubeapply apply [cluster ids] [--subpath=path] [--no-auto-merge]`: apply the changes \
         to the clusters\n\
         * `kubeapply status [cluster ids]`: summarize the workloads in the clusters\n\
         * `kubeapply help`: show this message\n\n\
         Cluster ids are `env:region:cluster` names and may contain `*` wildcards. \
         Without ids, every cluster listed above is used.\n",
    );
    out
}

/// An error report.
pub fn format_error_comment(env: &str, message: &str) -> String {
    let mut out = header("Kubeapply error", env);
    out.push_str("\n```\n");
    out.push_str(message.trim_end());
    out.push_str("\n```");
    out
}

/// Splits a comment body into pieces of about `max_len` bytes.
///
/// A body that fits is returned unchanged. Otherwise pieces end at the first
/// newline at or after `max_len`, which is dropped, and when the body contains
/// a fenced diff each piece gets its fences closed and reopened so it renders
/// on its own.
pub fn comment_chunks(body: &str, max_len: usize) -> Vec<String> {
    if body.len() <= max_len {
        return vec![body.to_string()];
    }

    let is_diff = body.contains(DIFF_FENCE);
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < body.len() {
        let mut end = (start + max_len).min(body.len());
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // A single character wider than max_len.
            end = body[start..]
                .char_indices()
                .nth(1)
                .map_or(body.len(), |(i, _)| start + i);
        }

        let mut chunk = match body[end..].find('\n') {
            Some(offset) => {
                let split = end + offset;
                let chunk = body[start..split].to_string();
                start = split + 1;
                chunk
            }
            None => {
                let chunk = body[start..end].to_string();
                start = end;
                chunk
            }
        };

        if is_diff {
            let has_end = chunk.contains("\n```\n");
            if !chunks.is_empty() {
                chunk.insert_str(0, DIFF_FENCE);
            }
            if !has_end {
                chunk.push_str("\n```");
            }
        }

        chunks.push(chunk);
    }

    if chunks.is_empty() {
        chunks.push(String::new());
    }
    chunks
}

/// The comment bodies to post for `body`, numbered when there is more than one.
pub fn comment_bodies(body: &str) -> Vec<String> {
    let chunks = comment_chunks(body, GITHUB_MAX_COMMENT_LEN);
    let total = chunks.len();
    if total == 1 {
        return chunks;
    }
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| format!("## Response chunk {}/{}\n{}", i + 1, total, chunk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn clusters() -> Vec<ClusterConfig> {
        ["test-cluster1", "test-cluster2"]
            .iter()
            .map(|name| {
                let mut config = ClusterConfig::new(*name, "test-region", "test-env");
                config.expanded_path = "expanded".to_string();
                config
            })
            .collect()
    }

    fn apply_result(name: &str, old: &str, new: &str) -> ApplyResult {
        ApplyResult {
            kind: "Deployment".to_string(),
            name: name.to_string(),
            namespace: "test-namespace".to_string(),
            created_at: None,
            old_version: old.to_string(),
            new_version: new.to_string(),
        }
    }

    #[test]
    fn apply_comment_has_marker_and_rows() {
        let mut configs = clusters();
        configs[0].subpaths = vec!["test/subpath".to_string()];

        let applies = vec![
            ClusterApply {
                cluster_config: configs[0].clone(),
                results: vec![
                    apply_result("web", "1234", "3456"),
                    apply_result("worker", "1234", "1234"),
                    apply_result("new", "", "1"),
                ],
            },
            ClusterApply {
                cluster_config: configs[1].clone(),
                results: vec![],
            },
        ];
        assert_eq!(applies[0].num_updates(), 2);

        let body = format_apply_comment("stage", &applies);
        assert!(body.starts_with("## 🤖 Kubeapply apply result (stage) 🤖"));
        assert!(body.contains(APPLY_RESULT_MARKER));
        assert!(body.contains("#### Cluster: `test-env:test-region:test-cluster1`"));
        assert!(body.contains("Subpaths (`test/subpath`)"));
        assert!(body.contains("| Deployment | web | test-namespace |  | 1234 | 3456 | updated |"));
        assert!(body.contains("| worker | test-namespace |  | 1234 | 1234 | unchanged |"));
        assert!(body.contains("| new | test-namespace |  |  | 1 | created |"));
        assert!(body.contains("2 of 3 resources created or updated."));
        assert!(body.contains("Subpaths (*all*)"));
        assert!(body.contains("No resources applied."));
    }

    #[test]
    fn diff_comment() {
        let configs = clusters();
        let diffs = vec![
            ClusterDiff {
                cluster_config: configs[0].clone(),
                results: vec![DiffResult::new("v1.ConfigMap.default.cfg", "-a: 1\n+a: 2")],
            },
            ClusterDiff {
                cluster_config: configs[1].clone(),
                results: vec![],
            },
        ];

        let body = format_diff_comment("stage", &diffs, "master", 0);
        assert!(body.starts_with("## 🤖 Kubeapply diff result (stage) 🤖"));
        assert!(!body.contains(APPLY_RESULT_MARKER));
        assert!(body.contains("| `v1.ConfigMap.default.cfg` | 1 | 1 |"));
        assert!(body.contains("```diff\n-a: 1\n+a: 2\n```"));
        assert!(body.contains("No diffs found."));
        assert!(!body.contains("behind"));

        let behind = format_diff_comment("stage", &diffs, "master", 3);
        assert!(behind.contains("behind `master` by 3 commit(s)"));
    }

    #[test]
    fn status_help_and_error_comments() {
        let configs = clusters();
        let statuses = vec![ClusterStatus {
            cluster_config: configs[0].clone(),
            health_summary: "summary test-cluster1\n".to_string(),
        }];
        let body = format_status_comment("stage", &statuses);
        assert!(body.starts_with("## 🤖 Kubeapply cluster status (stage) 🤖"));
        assert!(body.contains("```\nsummary test-cluster1\n```"));

        let help = format_help_comment("stage", &configs);
        assert!(help.contains("Kubeapply help (stage)"));
        assert!(help.contains("* `test-env:test-region:test-cluster2` (subpaths: *all*)"));
        assert!(help.contains("kubeapply apply [cluster ids]"));

        let error = format_error_comment("stage", "This is an error!");
        assert_eq!(
            error,
            "## 🤖 Kubeapply error (stage) 🤖\n\n```\nThis is an error!\n```"
        );
    }

    #[test]
    fn chunks_split_after_newlines() {
        let body = "0123456789abcdefghijABC\nDEFGHIJ\nKLMNO";

        assert_eq!(comment_chunks(body, 5000), vec![body]);
        assert_eq!(comment_chunks(body, 40), vec![body]);
        assert_eq!(
            comment_chunks(body, 20),
            vec!["0123456789abcdefghijABC", "DEFGHIJ\nKLMNO"]
        );
        assert_eq!(
            comment_chunks(body, 10),
            vec!["0123456789abcdefghijABC", "DEFGHIJ\nKL", "MNO"]
        );
    }

    #[test]
    fn chunks_reopen_diff_fences() {
        let body = "header\n```diff\n+line1\n+line2\n+line3\n```\nfooter";
        let chunks = comment_chunks(body, 20);

        assert!(chunks.len() > 1);
        assert!(chunks[0].starts_with("header\n```diff"));
        assert!(chunks[0].ends_with("\n```"));
        for chunk in &chunks[1..] {
            assert!(chunk.starts_with("```diff\n"), "{chunk:?}");
        }
    }

    #[test]
    fn short_diff_bodies_are_unchanged() {
        let body = "header\n```diff\n+line1\n```\nfooter";
        assert_eq!(comment_chunks(body, body.len()), vec![body]);

        let unterminated = "```diff\n+line1";
        assert_eq!(comment_bodies(unterminated), vec![unterminated]);
    }

    #[test]
    fn chunks_respect_char_boundaries() {
        let body = "🤖".repeat(10);
        let chunks = comment_chunks(&body, 5);
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn bodies_are_numbered_only_when_split() {
        assert_eq!(comment_bodies("short"), vec!["short"]);

        let long = format!("{}\n{}", "a".repeat(GITHUB_MAX_COMMENT_LEN), "b".repeat(10));
        let bodies = comment_bodies(&long);
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].starts_with("## Response chunk 1/2\naaaa"));
        assert_eq!(bodies[1], "## Response chunk 2/2\nbbbbbbbbbb");
    }

    #[test]
    fn cluster_headings_use_paths() {
        let mut config = ClusterConfig::new("c", "r", "e");
        config
            .set_defaults(Path::new("/repo/clusters/c.yaml"), Path::new("/repo"))
            .unwrap();
        assert!(cluster_heading(&config).contains("`e:r:c`"));
    }
}
