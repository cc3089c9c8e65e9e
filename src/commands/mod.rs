//! Command parsing for `kubeapply` comment commands.
//!
//! Operators drive the engine by commenting on a pull request.
//!
//! # Supported Commands
//!
//! - `kubeapply diff [selectors...]` - Diffs the change against each covered cluster
//! - `kubeapply apply [selectors...] [--no-auto-merge]` - Applies the change
//! - `kubeapply status [selectors...]` - Summarizes workloads in each covered cluster
//! - `kubeapply help` - Posts usage for the covered clusters
//!
//! Any command accepts `--subpath=<path>` to scope operations to one directory
//! under each cluster's expanded manifests.
//!
//! # Example
//!
//! ```
//! use kubeapply::commands::{classify_comment, parse_command, CommandKind, CommentType};
//!
//! let comment = "kubeapply diff stage:us-west-2:*";
//! assert_eq!(classify_comment(comment), CommentType::Command);
//!
//! let cmd = parse_command(comment).unwrap();
//! assert_eq!(cmd.kind, CommandKind::Diff);
//! assert_eq!(cmd.args, vec!["stage:us-west-2:*".to_string()]);
//! ```

mod parser;
mod types;

pub use parser::{
    APPLY_RESULT_MARKER, CommentType, INVOCATION_WORD, ParseError, classify_comment,
    parse_command,
};
pub use types::{Command, CommandKind};
