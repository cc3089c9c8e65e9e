//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, validates signatures, and processes
//! each one before responding, so GitHub's delivery log shows the outcome.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::cluster::ClusterClientFactory;
use crate::pullreq::{PullRequestClient, PullRequestClientSource};
use crate::types::DeliveryId;
use crate::webhooks::{ParseError, SignatureError, parse_webhook, verify_signature};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";
/// Header name for GitHub signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that end a delivery before it reaches the handler.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Missing or invalid signature.
    #[error("invalid signature: {0}")]
    Signature(#[from] SignatureError),

    /// The payload could not be parsed.
    #[error("could not parse webhook: {0}")]
    Parse(#[from] ParseError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            WebhookError::Signature(_) => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
            WebhookError::MissingHeader(_) | WebhookError::Parse(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        }
        .into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Headers:
///   - `X-GitHub-Event`: Event type (e.g., "pull_request", "issue_comment")
///   - `X-GitHub-Delivery`: Delivery ID, only used in logs
///   - `X-Hub-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 200 OK: Handled, or nothing to do
/// - 403 Forbidden: Missing or invalid signature
/// - 500 Internal Server Error: Missing event header, unparseable payload, or
///   the handler failed
pub async fn webhook_handler<S, F>(
    State(app_state): State<AppState<S, F>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, String), WebhookError>
where
    S: PullRequestClientSource + Send + Sync + 'static,
    F: ClusterClientFactory + Send + Sync + 'static,
{
    let delivery_id = DeliveryId::new(header(&headers, HEADER_DELIVERY).unwrap_or("unknown"));

    // Verify signature before any parsing.
    if let Err(e) = verify_signature(
        header(&headers, HEADER_SIGNATURE),
        &body,
        app_state.webhook_secret(),
    ) {
        warn!(delivery_id = %delivery_id, error = %e, "rejecting webhook");
        return Err(e.into());
    }

    let event_type = header(&headers, HEADER_EVENT).ok_or(WebhookError::MissingHeader(HEADER_EVENT))?;

    debug!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received webhook"
    );

    let event = match parse_webhook(event_type, &body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(delivery_id = %delivery_id, event_type = %event_type, "ignoring webhook");
            return Ok((StatusCode::OK, "OK".to_string()));
        }
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "could not parse webhook");
            return Err(e.into());
        }
    };

    let mut client = app_state.source().client_for(event.repo(), event.pr());
    let response = app_state.handler().handle_event(&event, &mut client).await;

    if let Err(e) = client.close().await {
        warn!(delivery_id = %delivery_id, error = %e, "error closing pull request client");
    }

    info!(
        delivery_id = %delivery_id,
        repo = %event.repo(),
        pr = event.pr().0,
        status = response.status.as_u16(),
        "webhook processed"
    );
    Ok((response.status, response.body))
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
