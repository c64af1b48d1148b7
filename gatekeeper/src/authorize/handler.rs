//! Access decisions for API Gateway request authorizers.
//!
//! The gateway hands us the request context and the ARN of the method being
//! invoked; we answer with an IAM policy scoped to that ARN.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, warn};

use super::validator::{AddressValidator, UpstreamError, ValidationError};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

// =============================================================================
// Inbound request
// =============================================================================

/// Authorizer event as delivered by the gateway.
///
/// Every field is optional so that an incomplete context produces a deny
/// decision rather than a decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizerRequest {
    #[serde(default)]
    pub request_context: Option<RequestContext>,
    #[serde(default)]
    pub method_arn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub identity: Option<Identity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Identity {
    #[serde(default, rename = "sourceIp")]
    pub source_ip: Option<String>,
}

impl RequestContext {
    /// Caller address, if the gateway supplied a non-blank one.
    pub fn source_ip(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .and_then(|i| i.source_ip.as_deref())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
    }
}

// =============================================================================
// Policy document
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    pub action: String,
    pub effect: Effect,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

/// Authorizer response: principal plus policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationDecision {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
}

impl AuthorizationDecision {
    /// Wildcard-principal policy for invoking `resource`.
    pub fn new(effect: Effect, resource: &str) -> Self {
        Self {
            principal_id: "*".to_string(),
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![Statement {
                    action: INVOKE_ACTION.to_string(),
                    effect,
                    resource: resource.to_string(),
                }],
            },
        }
    }

    pub fn effect(&self) -> Option<Effect> {
        self.policy_document.statement.first().map(|s| s.effect)
    }
}

// =============================================================================
// Decision
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No method ARN to scope a policy to.
    MissingResource,
    MissingSourceAddress,
    InvalidAddress(String),
    UntrustedAddress(String),
}

/// Outcome of an authorization check.
///
/// The gateway adapter turns `Deny` into the protocol-level rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow(AuthorizationDecision),
    Deny {
        reason: DenyReason,
        policy: AuthorizationDecision,
    },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow(_))
    }

    fn deny(reason: DenyReason, resource: &str) -> Self {
        AccessDecision::Deny {
            reason,
            policy: AuthorizationDecision::new(Effect::Deny, resource),
        }
    }
}

/// The trusted set could not be determined, so no decision was made.
#[derive(Debug, Error)]
pub enum AuthorizeError {
    #[error("cannot authorize: {0}")]
    UpstreamUnavailable(#[from] UpstreamError),
}

/// Decide whether the caller described by `context` may invoke `method_arn`.
///
/// A blank `method_arn` is denied before any upstream lookup.
pub async fn authorize(
    validator: &AddressValidator,
    context: Option<&RequestContext>,
    method_arn: &str,
) -> Result<AccessDecision, AuthorizeError> {
    let method_arn = method_arn.trim();
    if method_arn.is_empty() {
        warn!("authorize_missing_method_arn");
        return Ok(AccessDecision::deny(DenyReason::MissingResource, method_arn));
    }

    let source_ip = match context.and_then(RequestContext::source_ip) {
        Some(ip) => ip,
        None => {
            warn!(method_arn = %method_arn, "authorize_missing_source_ip");
            return Ok(AccessDecision::deny(
                DenyReason::MissingSourceAddress,
                method_arn,
            ));
        }
    };

    match validator.is_trusted(source_ip).await {
        Ok(true) => {
            info!(source_ip = %source_ip, method_arn = %method_arn, "authorize_allow");
            Ok(AccessDecision::Allow(AuthorizationDecision::new(
                Effect::Allow,
                method_arn,
            )))
        }
        Ok(false) => {
            warn!(source_ip = %source_ip, method_arn = %method_arn, "authorize_deny_untrusted");
            Ok(AccessDecision::deny(
                DenyReason::UntrustedAddress(source_ip.to_string()),
                method_arn,
            ))
        }
        Err(ValidationError::InvalidAddress(addr)) => {
            warn!(source_ip = %addr, method_arn = %method_arn, "authorize_deny_invalid_address");
            Ok(AccessDecision::deny(DenyReason::InvalidAddress(addr), method_arn))
        }
        Err(ValidationError::UpstreamUnavailable(e)) => {
            error!(source_ip = %source_ip, error = %e, "authorize_upstream_unavailable");
            Err(AuthorizeError::UpstreamUnavailable(e))
        }
    }
}

/// Convenience wrapper taking the whole gateway event.
pub async fn authorize_request(
    validator: &AddressValidator,
    request: &AuthorizerRequest,
) -> Result<AccessDecision, AuthorizeError> {
    authorize(
        validator,
        request.request_context.as_ref(),
        request.method_arn.as_deref().unwrap_or_default(),
    )
    .await
}
