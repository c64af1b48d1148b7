//! Web server module.
//!
//! Routes:
//! - `GET /health`
//! - `POST /authorize`: request authorizer for the gateway in front of the webhook
//! - `POST /webhooks/github`: GitHub deliveries
//! - `POST /events/dispatch`: deliveries forwarded as a `{headers, body}` envelope

pub mod handlers;
pub mod signature;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    authorize, dispatch_envelope, github_webhook, health, AppState, DispatchResponse,
    HealthResponse,
};
pub use signature::{is_signature_verification_enabled, verify_github_signature};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/authorize", post(authorize))
        .route("/webhooks/github", post(github_webhook))
        .route("/events/dispatch", post(dispatch_envelope))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
