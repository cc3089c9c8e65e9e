//! Command types for `kubeapply` comment commands.
//!
//! These commands are parsed from GitHub pull request comments.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of a `kubeapply` command, selected by the second token of a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// `kubeapply apply`: applies the expanded manifests in every covered cluster.
    Apply,

    /// `kubeapply diff`: diffs the expanded manifests against every covered cluster.
    Diff,

    /// `kubeapply status`: summarizes workloads in every covered cluster.
    Status,

    /// `kubeapply help`: posts usage for the covered clusters.
    Help,
}

impl CommandKind {
    /// All command kinds, in the order they are documented in help output.
    pub const ALL: [CommandKind; 4] = [
        CommandKind::Apply,
        CommandKind::Diff,
        CommandKind::Status,
        CommandKind::Help,
    ];

    /// Returns the word used for this command in comments and status contexts.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::Apply => "apply",
            CommandKind::Diff => "diff",
            CommandKind::Status => "status",
            CommandKind::Help => "help",
        }
    }

    /// Looks up a command kind by its exact (case-sensitive) word.
    pub fn from_word(word: &str) -> Option<Self> {
        CommandKind::ALL.into_iter().find(|kind| kind.as_str() == word)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `kubeapply` command from a comment.
///
/// `args` are positional cluster selectors (globs matched against a cluster's
/// `env:region:cluster` descriptive name), in the order they were written.
/// `flags` maps `--key` / `--key=value` tokens to their values; a bare `--key`
/// maps to the empty string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub args: Vec<String>,
    pub flags: BTreeMap<String, String>,
}

impl Command {
    /// Creates a command with no selectors and no flags.
    pub fn new(kind: CommandKind) -> Self {
        Command {
            kind,
            args: Vec::new(),
            flags: BTreeMap::new(),
        }
    }

    /// Returns the value of a flag, if it was given.
    pub fn flag(&self, name: &str) -> Option<&str> {
        self.flags.get(name).map(String::as_str)
    }

    /// Whether a boolean flag is switched on.
    ///
    /// A flag is on when present with no value (`--flag`) or with a
    /// case-insensitive `true` (`--flag=TRUE`).
    pub fn flag_enabled(&self, name: &str) -> bool {
        self.flag(name)
            .is_some_and(|value| value.is_empty() || value.eq_ignore_ascii_case("true"))
    }

    /// The `--subpath` override, when given with a non-empty value.
    pub fn subpath_override(&self) -> Option<&str> {
        self.flag("subpath").filter(|value| !value.is_empty())
    }
}
