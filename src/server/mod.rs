//! HTTP server for the kubeapply engine.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, validates signatures, and processes them
//!   before responding
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use tower_http::trace::TraceLayer;

use crate::cluster::ClusterClientFactory;
use crate::handler::WebhookHandler;
use crate::pullreq::PullRequestClientSource;

pub mod health;
pub mod webhook;

pub use health::health_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor. `S` creates
/// a pull request client per delivery; `F` creates cluster clients.
pub struct AppState<S, F> {
    inner: Arc<AppStateInner<S, F>>,
}

struct AppStateInner<S, F> {
    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    source: S,

    handler: WebhookHandler<F>,
}

// Derived Clone would require S: Clone and F: Clone.
impl<S, F> Clone for AppState<S, F> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, F> AppState<S, F> {
    pub fn new(webhook_secret: impl Into<Vec<u8>>, source: S, handler: WebhookHandler<F>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                webhook_secret: webhook_secret.into(),
                source,
                handler,
            }),
        }
    }

    /// Returns the webhook secret.
    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn handler(&self) -> &WebhookHandler<F> {
        &self.inner.handler
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S, F>(app_state: AppState<S, F>) -> axum::Router
where
    S: PullRequestClientSource + Send + Sync + 'static,
    F: ClusterClientFactory + Send + Sync + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler::<S, F>))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}
