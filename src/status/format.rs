//! Encoding of command outcomes into status contexts and descriptions.

use sha1::{Digest, Sha1};

use crate::commands::CommandKind;

/// GitHub rejects status descriptions longer than this.
pub const DESCRIPTION_LIMIT: usize = 140;

/// Length of the hashed cluster identifiers in descriptions.
const CLUSTER_ID_LEN: usize = 8;

/// Outcome of one command run, as recorded in a status description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    /// The command has started.
    Running,
    /// The command finished in every cluster.
    Succeeded,
    /// The command failed in some cluster.
    Errored,
    /// The command finished but its result is informational only.
    Ran,
}

impl StatusOutcome {
    fn prefix(self) -> &'static str {
        match self {
            StatusOutcome::Running => "Running",
            StatusOutcome::Succeeded => "Successfully ran",
            StatusOutcome::Errored => "Error running",
            StatusOutcome::Ran => "Ran",
        }
    }
}

/// The status context for a command in an environment, e.g. `kubeapply/diff (stage)`.
pub fn command_context(kind: CommandKind, env: &str) -> String {
    format!("kubeapply/{} ({})", kind, env)
}

/// The first 8 hex characters of the SHA-1 of a cluster's descriptive name.
///
/// Truncation makes collisions possible; they are not detected.
pub fn cluster_id(descriptive_name: &str) -> String {
    let digest = Sha1::digest(descriptive_name.as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(CLUSTER_ID_LEN);
    id
}

/// Comma-joined cluster ids for a set of descriptive names, in order.
pub fn hashed_cluster_names<I, S>(names: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| cluster_id(name.as_ref()))
        .collect::<Vec<_>>()
        .join(",")
}

/// A status description, e.g. `Successfully ran for clusters 1f2e3d4c,9a8b7c6d`.
///
/// When the ids do not fit in [`DESCRIPTION_LIMIT`], trailing ids are replaced
/// by ` and N more`; at least one id is always kept. Decoding only sees the
/// ids that were kept.
pub fn status_description(outcome: StatusOutcome, hashed_names: &str) -> String {
    let full = format!("{} for clusters {}", outcome.prefix(), hashed_names);
    if full.len() <= DESCRIPTION_LIMIT {
        return full;
    }

    let ids: Vec<&str> = hashed_names.split(',').collect();
    let truncated = |kept: usize| {
        format!(
            "{} for clusters {} and {} more",
            outcome.prefix(),
            ids[..kept].join(","),
            ids.len() - kept
        )
    };
    (1..ids.len())
        .rev()
        .map(&truncated)
        .find(|description| description.len() <= DESCRIPTION_LIMIT)
        .unwrap_or_else(|| truncated(1))
}
