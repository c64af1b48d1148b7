//! Webhook dispatch: turn GitHub deliveries into CodeBuild runs.
//!
//! ## Flow
//!
//! ```text
//! delivery → WebhookEvent::parse() → Dispatcher::dispatch() → BuildTrigger → CodeBuild
//! ```

pub mod dispatcher;
pub mod event;
pub mod trigger;

pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher};
pub use event::{
    branch_name, BuildTarget, EventError, PullRequestEvent, PushEvent, WebhookEnvelope,
    WebhookEvent, EVENT_HEADER,
};
pub use trigger::{BuildError, BuildHandle, BuildRequest, BuildTrigger};
