//! Parser for `kubeapply` commands in comment text.
//!
//! This module provides a pure parser that turns a pull request comment body
//! into a structured [`Command`], plus the classifier deciding whether a comment
//! is a command, one of our own apply-result comments, or neither.

use std::collections::BTreeMap;

use thiserror::Error;

use super::types::{Command, CommandKind};

/// The word every command comment must start with.
pub const INVOCATION_WORD: &str = "kubeapply";

/// Marker included in every apply-result comment the engine posts.
///
/// Seeing it in a new comment is what triggers the automerge check.
pub const APPLY_RESULT_MARKER: &str = "Kubeapply apply result";

/// Errors from parsing a command comment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The first token is not the invocation word.
    #[error("comment does not start with `kubeapply`")]
    NotACommand,

    /// Only the invocation word was given.
    #[error("must provide at least 2 args")]
    MissingCommand,

    /// The second token is not a known command.
    #[error("unrecognized command: {0}")]
    UnknownCommand(String),
}

/// What a pull request comment is, as far as the engine is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentType {
    /// Starts with the invocation word; should be parsed with [`parse_command`].
    Command,
    /// An apply-result comment previously posted by the engine.
    ApplyResult,
    /// Anything else; dropped before dispatch.
    Other,
}

/// Classifies a comment body.
///
/// The apply-result marker takes precedence, so an apply comment quoting a
/// command is still treated as an apply result.
pub fn classify_comment(body: &str) -> CommentType {
    if body.contains(APPLY_RESULT_MARKER) {
        return CommentType::ApplyResult;
    }

    match body.split_whitespace().next() {
        Some(INVOCATION_WORD) => CommentType::Command,
        _ => CommentType::Other,
    }
}

/// Parses a comment body into a [`Command`].
///
/// # Parsing Rules
///
/// - The body is split on whitespace; blank tokens are skipped
/// - The first token must be exactly `kubeapply`
/// - The second token selects the command (`apply`, `diff`, `status`, `help`)
/// - `--key=value` sets a flag (split at the first `=`), `--key` sets it to `""`
/// - Later occurrences of the same flag overwrite earlier ones
/// - Every other token is a positional selector, order preserved
///
/// # Examples
///
/// ```
/// use kubeapply::commands::{parse_command, CommandKind};
///
/// let cmd = parse_command("kubeapply apply stage:* --subpath=apps --no-auto-merge").unwrap();
/// assert_eq!(cmd.kind, CommandKind::Apply);
/// assert_eq!(cmd.args, vec!["stage:*".to_string()]);
/// assert_eq!(cmd.flag("subpath"), Some("apps"));
/// assert_eq!(cmd.flag("no-auto-merge"), Some(""));
///
/// assert!(parse_command("kubeapply").is_err());
/// assert!(parse_command("kubeapply destroy").is_err());
/// ```
pub fn parse_command(body: &str) -> Result<Command, ParseError> {
    let mut tokens = body.split_whitespace();

    if tokens.next() != Some(INVOCATION_WORD) {
        return Err(ParseError::NotACommand);
    }

    let word = tokens.next().ok_or(ParseError::MissingCommand)?;
    let kind =
        CommandKind::from_word(word).ok_or_else(|| ParseError::UnknownCommand(word.to_string()))?;

    let mut args = Vec::new();
    let mut flags = BTreeMap::new();

    for token in tokens {
        match token.strip_prefix("--") {
            Some(flag) => {
                let (key, value) = flag.split_once('=').unwrap_or((flag, ""));
                flags.insert(key.to_string(), value.to_string());
            }
            None => args.push(token.to_string()),
        }
    }

    Ok(Command { kind, args, flags })
}
