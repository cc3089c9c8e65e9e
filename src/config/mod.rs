//! Configuration: per-cluster YAML configs found in the repository, and the
//! settings for the engine itself.

mod cluster;
mod settings;

pub use cluster::{ClusterConfig, ConfigError, ROOT_SUBPATH};
pub use settings::HandlerSettings;
