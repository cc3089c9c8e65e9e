//! Structured apply and diff results.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::KubectlError;

/// The outcome of applying a single resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Resource version before the apply; empty when the resource is new.
    pub old_version: String,
    pub new_version: String,
}

impl ApplyResult {
    pub fn is_created(&self) -> bool {
        self.old_version.is_empty()
    }

    pub fn is_updated(&self) -> bool {
        !self.old_version.is_empty() && self.old_version != self.new_version
    }

    /// Creation time in RFC 3339; empty for resources created by this apply.
    pub fn created_timestamp(&self) -> String {
        if self.is_created() {
            return String::new();
        }
        self.created_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default()
    }
}

/// The diff of a single resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResult {
    pub name: String,
    pub raw_diff: String,
    pub num_added: usize,
    pub num_removed: usize,
}

impl DiffResult {
    pub fn new(name: impl Into<String>, raw_diff: impl Into<String>) -> Self {
        let raw_diff = raw_diff.into();
        let (num_added, num_removed) = diff_counts(&raw_diff);
        DiffResult {
            name: name.into(),
            raw_diff,
            num_added,
            num_removed,
        }
    }

    pub fn num_changed_lines(&self) -> usize {
        self.num_added.max(self.num_removed)
    }

    /// The raw diff cut to at most `max_len` bytes, with a note of what was dropped.
    pub fn clipped_raw_diff(&self, max_len: usize) -> String {
        if self.raw_diff.len() <= max_len {
            return self.raw_diff.clone();
        }
        let mut end = max_len;
        while !self.raw_diff.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}\n... ({} chars omitted)",
            &self.raw_diff[..end],
            self.raw_diff.len() - end
        )
    }
}

/// The fields of a Kubernetes object that apply results are built from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeObject {
    pub api_version: String,
    pub kind: String,
    pub metadata: KubeMetadata,
    pub items: Vec<KubeObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeMetadata {
    pub name: String,
    pub namespace: String,
    pub resource_version: String,
    pub creation_timestamp: String,
}

/// Parses the output of `kubectl ... -o json` into objects.
///
/// Anything before the first `{` (kubectl warnings) is skipped. A `List` root
/// is flattened into its items.
pub fn kube_json_to_objects(contents: &str) -> Result<Vec<KubeObject>, KubectlError> {
    let start = contents
        .find('{')
        .ok_or_else(|| KubectlError::NotJson(contents.to_string()))?;

    let root: KubeObject = serde_json::from_str(&contents[start..])?;

    if root.kind.is_empty() {
        return Err(KubectlError::MissingKind);
    }

    if root.kind == "List" {
        Ok(root.items)
    } else {
        Ok(vec![root])
    }
}

/// Pairs objects from before and after an apply into per-resource results.
///
/// Objects are matched on (kind, name, namespace); results keep the order of
/// `old_objects`. New objects without an old counterpart are skipped.
pub fn objects_to_results(old_objects: &[KubeObject], new_objects: &[KubeObject]) -> Vec<ApplyResult> {
    let mut results: Vec<ApplyResult> = Vec::with_capacity(old_objects.len());
    let mut positions: HashMap<(&str, &str, &str), usize> = HashMap::new();

    for old in old_objects {
        let created_at = parse_creation_time(&old.metadata.creation_timestamp);
        let result = ApplyResult {
            kind: old.kind.clone(),
            name: old.metadata.name.clone(),
            namespace: old.metadata.namespace.clone(),
            created_at,
            old_version: old.metadata.resource_version.clone(),
            new_version: String::new(),
        };

        match positions.get(&object_key(old)) {
            Some(&position) => results[position] = result,
            None => {
                positions.insert(object_key(old), results.len());
                results.push(result);
            }
        }
    }

    for new in new_objects {
        match positions.get(&object_key(new)) {
            Some(&position) => {
                results[position].new_version = new.metadata.resource_version.clone();
            }
            None => {
                warn!(
                    kind = %new.kind,
                    name = %new.metadata.name,
                    namespace = %new.metadata.namespace,
                    "applied object not found in dry-run output"
                );
            }
        }
    }

    results
}

/// Sorts results by namespace, then kind, then name.
///
/// Names and namespaces ending in `-<number>` compare numerically on the
/// suffix, so `web-2` sorts before `web-10`.
pub fn sort_apply_results(results: &mut [ApplyResult]) {
    results.sort_by(|a, b| {
        split_index(&a.namespace)
            .cmp(&split_index(&b.namespace))
            .then_with(|| a.kind.cmp(&b.kind))
            .then_with(|| split_index(&a.name).cmp(&split_index(&b.name)))
    });
}

fn split_index(name: &str) -> (&str, u64) {
    match name.rsplit_once('-') {
        Some((base, suffix)) => match suffix.parse() {
            Ok(index) => (base, index),
            Err(_) => (name, 0),
        },
        None => (name, 0),
    }
}

fn object_key(object: &KubeObject) -> (&str, &str, &str) {
    (
        object.kind.as_str(),
        object.metadata.name.as_str(),
        object.metadata.namespace.as_str(),
    )
}

fn parse_creation_time(timestamp: &str) -> Option<DateTime<Utc>> {
    if timestamp.is_empty() {
        return None;
    }
    match DateTime::parse_from_rfc3339(timestamp) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!(timestamp, error = %e, "could not parse creation time");
            None
        }
    }
}

/// Counts added and removed lines in a unified diff, ignoring file headers.
pub fn diff_counts(raw_diff: &str) -> (usize, usize) {
    let mut added = 0;
    let mut removed = 0;
    for line in raw_diff.lines() {
        if line.starts_with("+++") || line.starts_with("---") {
            continue;
        }
        if line.starts_with('+') {
            added += 1;
        } else if line.starts_with('-') {
            removed += 1;
        }
    }
    (added, removed)
}

/// Splits the output of `kubectl diff` into one result per resource.
///
/// kubectl runs `diff -u -N` once per resource, so each section starts with a
/// `diff ` line naming the live and merged files. The resource name is the file
/// name of the merged side, e.g. `apps.v1.Deployment.default.web`. Output
/// before the first section is ignored.
pub fn split_unified_diff(output: &str) -> Vec<DiffResult> {
    let mut results = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in output.lines() {
        if let Some(header) = line.strip_prefix("diff ") {
            if let Some((name, lines)) = current.take() {
                push_section(&mut results, name, &lines);
            }
            let name = header
                .split_whitespace()
                .last()
                .and_then(|path| path.rsplit('/').next())
                .unwrap_or_default()
                .to_string();
            current = Some((name, Vec::new()));
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }

    if let Some((name, lines)) = current {
        push_section(&mut results, name, &lines);
    }

    results
}

fn push_section(results: &mut Vec<DiffResult>, name: String, lines: &[&str]) {
    let raw_diff = lines.join("\n");
    if raw_diff.trim().is_empty() {
        return;
    }
    results.push(DiffResult::new(name, raw_diff));
}
