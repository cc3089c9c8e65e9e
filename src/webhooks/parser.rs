//! GitHub webhook payload parser.
//!
//! This module parses raw webhook JSON payloads into [`WebhookEvent`] values.
//! The parser is robust against unknown fields and event types.
//!
//! # Parsing Strategy
//!
//! 1. The event type is determined from the `X-GitHub-Event` header
//! 2. The payload is parsed according to the event type
//! 3. Irrelevant events and actions return `Ok(None)` (ignored, not error)
//! 4. Malformed payloads return `Err` with details

use serde::Deserialize;
use thiserror::Error;

use crate::commands::{CommentType, classify_comment};
use crate::types::{PrNumber, RepoId};

use super::events::WebhookEvent;

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has an invalid value.
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into an event the handler acts on.
///
/// # Returns
///
/// * `Ok(Some(event))` - A delivery the handler should process
/// * `Ok(None)` - Irrelevant event type, action or comment
/// * `Err(e)` - Malformed payload or missing required fields
///
/// # Examples
///
/// ```
/// use kubeapply::webhooks::{parse_webhook, WebhookEvent};
///
/// let payload = br#"{
///     "action": "created",
///     "comment": { "body": "kubeapply diff" },
///     "issue": { "number": 42, "pull_request": { "url": "..." } },
///     "repository": { "full_name": "segmentio/kubeapply" }
/// }"#;
///
/// let event = parse_webhook("issue_comment", payload).unwrap().unwrap();
/// assert!(matches!(event, WebhookEvent::CommentCommand { .. }));
/// ```
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<WebhookEvent>, ParseError> {
    match event_type {
        "issue_comment" => parse_issue_comment(payload),
        "pull_request" => parse_pull_request(payload),
        _ => Ok(None),
    }
}

// ============================================================================
// Raw payload structures for deserialization
//
// These match GitHub's webhook JSON structure, keeping only the fields the
// engine reads.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawRepository {
    full_name: String,
}

impl RawRepository {
    fn repo_id(&self) -> Result<RepoId, ParseError> {
        RepoId::parse_full_name(&self.full_name).ok_or_else(|| ParseError::InvalidField {
            field: "repository.full_name",
            value: self.full_name.clone(),
        })
    }
}

// ============================================================================
// issue_comment event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawIssueCommentPayload {
    action: String,
    comment: RawComment,
    issue: RawIssue,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    body: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    number: u64,
    // If this field is present, the issue is actually a PR
    pull_request: Option<serde_json::Value>,
}

fn parse_issue_comment(payload: &[u8]) -> Result<Option<WebhookEvent>, ParseError> {
    let raw: RawIssueCommentPayload = serde_json::from_slice(payload)?;

    if raw.issue.pull_request.is_none() {
        tracing::debug!(issue = raw.issue.number, "comment is not on a pull request");
        return Ok(None);
    }
    if raw.action != "created" {
        tracing::debug!(action = %raw.action, "ignoring comment action");
        return Ok(None);
    }

    let repo = raw.repository.repo_id()?;
    let pr = PrNumber(raw.issue.number);
    let body = raw.comment.body.unwrap_or_default();

    Ok(match classify_comment(&body) {
        CommentType::Command => Some(WebhookEvent::CommentCommand { repo, pr, body }),
        CommentType::ApplyResult => Some(WebhookEvent::CommentApplyResult { repo, pr, body }),
        CommentType::Other => {
            tracing::debug!(pr = pr.0, "comment is neither a command nor an apply result");
            None
        }
    })
}

// ============================================================================
// pull_request event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
}

fn parse_pull_request(payload: &[u8]) -> Result<Option<WebhookEvent>, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;

    let repo = raw.repository.repo_id()?;
    let pr = PrNumber(raw.pull_request.number);

    Ok(match raw.action.as_str() {
        "opened" => Some(WebhookEvent::PullRequestOpened { repo, pr }),
        "synchronize" => Some(WebhookEvent::PullRequestSynchronized { repo, pr }),
        other => {
            tracing::debug!(action = other, "ignoring pull request action");
            None
        }
    })
}
