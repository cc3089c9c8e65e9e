//! Cluster coverage: which cluster configs a pull request touches, and where.
//!
//! A cluster is covered when a changed file lives under its expanded manifest
//! tree. Each covered cluster is scoped to the lowest directories containing
//! its changes, so diffs and applies only touch what changed.

mod parents;
mod resolver;

pub use parents::{lowest_parents, relative_path};
pub use resolver::{CoverageError, resolve_covered_clusters};
