//! HTTP endpoint handlers.
//!
//! These are thin adapters: they decode the request, call into
//! [`crate::authorize`] or [`crate::dispatch`], and map the outcome onto a
//! status code.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::authorize::{authorize_request, AccessDecision, AddressValidator, AuthorizerRequest};
use crate::dispatch::{
    DispatchError, DispatchOutcome, Dispatcher, EventError, WebhookEnvelope, WebhookEvent,
    EVENT_HEADER,
};
use crate::web::signature::{
    is_signature_verification_enabled, verify_github_signature, SIGNATURE_HEADER,
};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub validator: Arc<AddressValidator>,
    /// `None` when the build settings are incomplete.
    pub dispatcher: Option<Arc<Dispatcher>>,
}

impl AppState {
    pub fn new(config: Config, validator: AddressValidator, dispatcher: Option<Dispatcher>) -> Self {
        Self {
            config: Arc::new(config),
            validator: Arc::new(validator),
            dispatcher: dispatcher.map(Arc::new),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Authorizer
// =============================================================================

/// Error body in the shape API Gateway uses for authorizer rejections.
#[derive(Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Request authorizer endpoint.
///
/// Allow → 200 with the policy. Deny → 403 with the deny policy.
/// Upstream failure → 503, so callers can tell an outage from a rejection.
pub async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<AuthorizerRequest>,
) -> Response {
    info!(
        method_arn = ?request.method_arn,
        has_request_context = request.request_context.is_some(),
        "authorize_request_received"
    );

    match authorize_request(&state.validator, &request).await {
        Ok(AccessDecision::Allow(policy)) => (StatusCode::OK, Json(policy)).into_response(),
        Ok(AccessDecision::Deny { reason, policy }) => {
            warn!(reason = ?reason, method_arn = ?request.method_arn, "authorize_rejected");
            (StatusCode::FORBIDDEN, Json(policy)).into_response()
        }
        Err(e) => {
            error!(error = %e, "authorize_failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(MessageResponse {
                    message: "authorization source unavailable",
                }),
            )
                .into_response()
        }
    }
}

// =============================================================================
// GitHub Webhook
// =============================================================================

/// Dispatch response.
#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DispatchResponse {
    fn status(status: &'static str) -> Self {
        Self {
            status,
            build_id: None,
            error: None,
        }
    }

    fn error(status: &'static str, error: impl ToString) -> Self {
        Self {
            status,
            build_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// GitHub webhook endpoint.
///
/// This endpoint:
/// 1. Verifies `X-Hub-Signature-256` (if a secret is configured)
/// 2. Parses the event named by `X-GitHub-Event`
/// 3. Starts a build for build-worthy events
pub async fn github_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<DispatchResponse>) {
    let event_type = headers.get(EVENT_HEADER).and_then(|v| v.to_str().ok());
    let delivery = headers
        .get("X-GitHub-Delivery")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    info!(
        event_type = ?event_type,
        delivery = %delivery,
        body_length = body.len(),
        "github_webhook_received"
    );

    if is_signature_verification_enabled(&state.config.github_webhook_secret) {
        let secret = state.config.github_webhook_secret.as_deref().unwrap_or_default();
        let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
        if !verify_github_signature(secret, &body, signature) {
            warn!(delivery = %delivery, "github_signature_invalid");
            return (
                StatusCode::UNAUTHORIZED,
                Json(DispatchResponse::status("unauthorized")),
            );
        }
    }

    let dispatcher = match require_dispatcher(&state) {
        Ok(d) => d,
        Err(response) => return response,
    };

    let event = match event_type {
        Some(event_type) => WebhookEvent::from_slice(event_type, &body),
        None => Err(EventError::MissingEventType),
    };

    let result = match event {
        Ok(event) => dispatcher.dispatch(&event).await.map_err(DispatchError::from),
        Err(e) => Err(DispatchError::from(e)),
    };

    respond(result)
}

/// Proxied delivery endpoint: `{"headers": {...}, "body": ...}`.
pub async fn dispatch_envelope(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> (StatusCode, Json<DispatchResponse>) {
    info!(event_type = ?envelope.event_type(), "webhook_envelope_received");

    let dispatcher = match require_dispatcher(&state) {
        Ok(d) => d,
        Err(response) => return response,
    };

    respond(dispatcher.dispatch_envelope(envelope).await)
}

fn require_dispatcher(
    state: &AppState,
) -> Result<&Dispatcher, (StatusCode, Json<DispatchResponse>)> {
    state.dispatcher.as_deref().ok_or_else(|| {
        error!("dispatch_not_configured");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(DispatchResponse::status("build_not_configured")),
        )
    })
}

fn respond(
    result: Result<DispatchOutcome, DispatchError>,
) -> (StatusCode, Json<DispatchResponse>) {
    match result {
        Ok(DispatchOutcome::BuildStarted(handle)) => (
            StatusCode::OK,
            Json(DispatchResponse {
                status: "build_started",
                build_id: Some(handle.0),
                error: None,
            }),
        ),
        Ok(DispatchOutcome::PassThrough) => {
            (StatusCode::OK, Json(DispatchResponse::status("ignored")))
        }
        Err(e @ DispatchError::MalformedEvent(_)) => {
            error!(error = %e, "webhook_event_malformed");
            (
                StatusCode::BAD_REQUEST,
                Json(DispatchResponse::error("malformed_event", e)),
            )
        }
        Err(e @ DispatchError::BuildServiceError(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(DispatchResponse::error("build_failed", e)),
        ),
    }
}
