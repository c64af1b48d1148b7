//! GitHub webhook events, parsed once at the boundary.
//!
//! Only `pull_request` and `push` are understood. Fields needed to act on a
//! build-worthy event are validated here, so a missing field surfaces as
//! [`EventError::Malformed`] before any side effect happens.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-GitHub-Event";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("missing X-GitHub-Event header")]
    MissingEventType,

    #[error("webhook body is not valid JSON: {0}")]
    InvalidBody(#[source] serde_json::Error),

    #[error("malformed {event_type} event: {detail}")]
    Malformed { event_type: String, detail: String },
}

impl EventError {
    fn missing(event_type: &str, field: &str) -> Self {
        EventError::Malformed {
            event_type: event_type.to_string(),
            detail: format!("missing field `{}`", field),
        }
    }

    fn wrong_type(event_type: &str, field: &str, expected: &str) -> Self {
        EventError::Malformed {
            event_type: event_type.to_string(),
            detail: format!("field `{}` must be {}", field, expected),
        }
    }

    fn invalid(event_type: &str, err: serde_json::Error) -> Self {
        EventError::Malformed {
            event_type: event_type.to_string(),
            detail: err.to_string(),
        }
    }
}

/// The commit a build should run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildTarget {
    pub branch: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestEvent {
    Opened(BuildTarget),
    Reopened(BuildTarget),
    /// Any other action (`closed`, `labeled`, `synchronize`, ...).
    Other { action: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    BranchDeleted { git_ref: Option<String> },
    Updated(BuildTarget),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    PullRequest(PullRequestEvent),
    Push(PushEvent),
    Other { event_type: String },
}

// Wire shapes for the fields a build needs. They are only decoded once the
// event has been classified as build-worthy.

#[derive(Debug, Deserialize)]
struct HeadRef {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushTarget {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    after: Option<String>,
}

impl WebhookEvent {
    /// Classify and validate a delivery.
    pub fn parse(event_type: &str, body: &Value) -> Result<Self, EventError> {
        match event_type {
            "pull_request" => parse_pull_request(body).map(WebhookEvent::PullRequest),
            "push" => parse_push(body).map(WebhookEvent::Push),
            other => Ok(WebhookEvent::Other {
                event_type: other.to_string(),
            }),
        }
    }

    /// Like [`WebhookEvent::parse`], from raw body bytes.
    pub fn from_slice(event_type: &str, body: &[u8]) -> Result<Self, EventError> {
        match event_type {
            "pull_request" | "push" => {
                let value: Value = serde_json::from_slice(body).map_err(EventError::InvalidBody)?;
                Self::parse(event_type, &value)
            }
            // Bodies of ignored events are never inspected.
            other => Ok(WebhookEvent::Other {
                event_type: other.to_string(),
            }),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            WebhookEvent::PullRequest(_) => "pull_request",
            WebhookEvent::Push(_) => "push",
            WebhookEvent::Other { event_type } => event_type,
        }
    }

    /// Branch and commit to build, if this event warrants a build.
    pub fn build_target(&self) -> Option<&BuildTarget> {
        match self {
            WebhookEvent::PullRequest(PullRequestEvent::Opened(target))
            | WebhookEvent::PullRequest(PullRequestEvent::Reopened(target))
            | WebhookEvent::Push(PushEvent::Updated(target)) => Some(target),
            _ => None,
        }
    }
}

fn parse_pull_request(body: &Value) -> Result<PullRequestEvent, EventError> {
    const TYPE: &str = "pull_request";

    let action = match body.get("action") {
        Some(Value::String(action)) => action.as_str(),
        None | Some(Value::Null) => return Err(EventError::missing(TYPE, "action")),
        Some(_) => return Err(EventError::wrong_type(TYPE, "action", "a string")),
    };

    let opened = match action {
        "opened" => true,
        "reopened" => false,
        _ => {
            return Ok(PullRequestEvent::Other {
                action: action.to_string(),
            })
        }
    };

    let head = body
        .get("pull_request")
        .and_then(|pr| pr.get("head"))
        .filter(|head| !head.is_null())
        .ok_or_else(|| EventError::missing(TYPE, "pull_request.head"))?;
    let head = HeadRef::deserialize(head).map_err(|e| EventError::invalid(TYPE, e))?;

    let target = BuildTarget {
        branch: head
            .git_ref
            .ok_or_else(|| EventError::missing(TYPE, "pull_request.head.ref"))?,
        commit: head
            .sha
            .ok_or_else(|| EventError::missing(TYPE, "pull_request.head.sha"))?,
    };

    Ok(if opened {
        PullRequestEvent::Opened(target)
    } else {
        PullRequestEvent::Reopened(target)
    })
}

fn parse_push(body: &Value) -> Result<PushEvent, EventError> {
    const TYPE: &str = "push";

    let deleted = match body.get("deleted") {
        Some(Value::Bool(deleted)) => *deleted,
        None | Some(Value::Null) => return Err(EventError::missing(TYPE, "deleted")),
        Some(_) => return Err(EventError::wrong_type(TYPE, "deleted", "a boolean")),
    };

    if deleted {
        return Ok(PushEvent::BranchDeleted {
            git_ref: body.get("ref").and_then(Value::as_str).map(str::to_string),
        });
    }

    let raw = PushTarget::deserialize(body).map_err(|e| EventError::invalid(TYPE, e))?;
    let git_ref = raw.git_ref.ok_or_else(|| EventError::missing(TYPE, "ref"))?;
    let commit = raw.after.ok_or_else(|| EventError::missing(TYPE, "after"))?;

    Ok(PushEvent::Updated(BuildTarget {
        branch: branch_name(&git_ref).to_string(),
        commit,
    }))
}

/// `refs/heads/main` → `main`; other refs are left as they are.
pub fn branch_name(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref)
}

// =============================================================================
// Proxied envelope
// =============================================================================

/// A delivery forwarded by a proxy as `{"headers": {...}, "body": ...}`.
///
/// `body` is either the JSON payload itself or a string containing it.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

impl WebhookEnvelope {
    /// Event type header. The canonical spelling wins; otherwise the
    /// first case-insensitive match in key order.
    pub fn event_type(&self) -> Option<&str> {
        if let Some(value) = self.headers.get(EVENT_HEADER) {
            return Some(value.as_str());
        }

        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(EVENT_HEADER))
            .min_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, v)| v.as_str())
    }

    pub fn into_event(self) -> Result<WebhookEvent, EventError> {
        let event_type = self
            .event_type()
            .ok_or(EventError::MissingEventType)?
            .to_string();

        match &self.body {
            Value::String(raw) => WebhookEvent::from_slice(&event_type, raw.as_bytes()),
            body => WebhookEvent::parse(&event_type, body),
        }
    }
}

/// Proxies send `"headers": null` when a delivery carried none.
fn null_as_empty<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, String>>::deserialize(deserializer)?.unwrap_or_default())
}
