//! Lowest non-overlapping parent directories of a set of changed files.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use crate::config::ROOT_SUBPATH;

/// Returns the lowest parent directories of `files`, relative to `root`.
///
/// Files are grouped by their parent directory, then any directory that has an
/// ancestor in the group is dropped, so no returned directory contains another.
/// The result is sorted.
///
/// Special cases, each of which yields exactly `["."]`:
/// - no files
/// - any file outside `root`
/// - any file directly in `root`
pub fn lowest_parents<P: AsRef<Path>>(root: &Path, files: &[P]) -> Vec<String> {
    let mut dirs = BTreeSet::new();

    for file in files {
        let rel = relative_path(root, file.as_ref());
        if matches!(rel.components().next(), Some(Component::ParentDir)) {
            return vec![ROOT_SUBPATH.to_string()];
        }

        let dir = rel.parent().map(slash_path).unwrap_or_default();
        if dir.is_empty() {
            return vec![ROOT_SUBPATH.to_string()];
        }
        dirs.insert(dir);
    }

    if dirs.is_empty() {
        return vec![ROOT_SUBPATH.to_string()];
    }

    dirs.iter()
        .filter(|dir| !has_ancestor_in(dir, &dirs))
        .cloned()
        .collect()
}

fn has_ancestor_in(dir: &str, dirs: &BTreeSet<String>) -> bool {
    dir.match_indices('/')
        .any(|(index, _)| dirs.contains(&dir[..index]))
}

/// Computes `target` relative to `base` lexically, without touching the filesystem.
///
/// The result starts with `..` components when `target` is not under `base`.
pub fn relative_path(base: &Path, target: &Path) -> PathBuf {
    let base = normalize(base);
    let target = normalize(target);

    let common = base
        .iter()
        .zip(target.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..base.len() {
        rel.push("..");
    }
    for component in &target[common..] {
        rel.push(component);
    }
    rel
}

fn normalize(path: &Path) -> Vec<Component<'_>> {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out
}

/// Renders a relative path with `/` separators, as used in subpaths.
fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
