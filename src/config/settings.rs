//! Engine-wide settings.

use serde::{Deserialize, Serialize};

/// Settings shared by every webhook the handler processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerSettings {
    /// The environment this engine instance serves. Clusters in other
    /// environments are never covered; an empty value covers every environment.
    pub env: String,

    /// Target URL attached to every status check.
    pub logs_url: String,

    /// Block applies unless the pull request is approved and all non-apply
    /// statuses are green.
    pub strict_check: bool,

    /// Merge automatically once every covered cluster is diffed and applied.
    pub automerge: bool,

    /// Run cluster operations with verbose output.
    pub debug: bool,
}

impl HandlerSettings {
    pub fn new(env: impl Into<String>) -> Self {
        HandlerSettings {
            env: env.into(),
            ..Default::default()
        }
    }
}
