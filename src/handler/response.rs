//! Handler outcomes and the errors that turn into 500 responses.

use axum::http::StatusCode;
use thiserror::Error;

/// What a cluster operation was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    Applying,
    Diffing,
    GettingStatus,
}

impl ClusterAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ClusterAction::Applying => "applying",
            ClusterAction::Diffing => "diffing",
            ClusterAction::GettingStatus => "getting status",
        }
    }
}

/// Errors that end a delivery with a 500.
///
/// Each one has already been reported on the pull request (error comment,
/// failed status) by the time it is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// `PullRequestClient::init` failed.
    #[error("{0}")]
    Init(String),

    /// Cluster coverage could not be computed.
    #[error("{0}")]
    Coverage(String),

    /// A cluster client could not be created.
    #[error("Error creating client for cluster {cluster}: {message}")]
    ClientCreation { cluster: String, message: String },

    /// The comment started with `kubeapply` but did not parse.
    #[error("Unrecognized command")]
    UnrecognizedCommand,

    /// The apply gate refused to run; one line per failing check.
    #[error("{0}")]
    Precondition(String),

    /// A per-cluster operation failed or timed out. The fan-out stopped here.
    #[error("Error {} for cluster {cluster}: {message}", .action.as_str())]
    ClusterOperation {
        action: ClusterAction,
        cluster: String,
        message: String,
    },

    /// Posting a comment that the response depends on failed.
    #[error("{0}")]
    Comment(String),

    /// The automerge call itself failed.
    #[error("{0}")]
    Merge(String),
}

/// The HTTP response a delivery produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerResponse {
    pub status: StatusCode,
    pub body: String,
}

impl HandlerResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        let body = body.into();
        tracing::info!(body = %body, "returning OK response");
        HandlerResponse {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn error(err: &HandlerError) -> Self {
        tracing::warn!(error = %err, "returning error response");
        HandlerResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: err.to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

impl From<HandlerError> for HandlerResponse {
    fn from(err: HandlerError) -> Self {
        HandlerResponse::error(&err)
    }
}
