//! Routes webhook events to the build trigger.

use thiserror::Error;
use tracing::info;

use super::event::{EventError, PullRequestEvent, PushEvent, WebhookEnvelope, WebhookEvent};
use super::trigger::{BuildError, BuildHandle, BuildTrigger};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    MalformedEvent(#[from] EventError),

    #[error(transparent)]
    BuildServiceError(#[from] BuildError),
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    BuildStarted(BuildHandle),
    PassThrough,
}

#[derive(Clone)]
pub struct Dispatcher {
    trigger: BuildTrigger,
}

impl Dispatcher {
    pub fn new(trigger: BuildTrigger) -> Self {
        Self { trigger }
    }

    /// Start a build for build-worthy events; everything else is a no-op.
    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchOutcome, BuildError> {
        let (kind, target) = match event {
            WebhookEvent::PullRequest(PullRequestEvent::Opened(target)) => ("new_pr", target),
            WebhookEvent::PullRequest(PullRequestEvent::Reopened(target)) => {
                ("reopened_pr", target)
            }
            WebhookEvent::Push(PushEvent::Updated(target)) => ("push", target),
            WebhookEvent::PullRequest(PullRequestEvent::Other { action }) => {
                info!(event_type = "pull_request", action = %action, "pass_through_event");
                return Ok(DispatchOutcome::PassThrough);
            }
            WebhookEvent::Push(PushEvent::BranchDeleted { git_ref }) => {
                info!(event_type = "push", git_ref = ?git_ref, "pass_through_branch_deleted");
                return Ok(DispatchOutcome::PassThrough);
            }
            WebhookEvent::Other { event_type } => {
                info!(event_type = %event_type, "pass_through_event");
                return Ok(DispatchOutcome::PassThrough);
            }
        };

        info!(
            trigger = kind,
            branch = %target.branch,
            commit = %target.commit,
            "build_requested"
        );

        let request = self.trigger.request_for(&target.branch, &target.commit);
        let handle = self.trigger.start_build(&request).await?;

        Ok(DispatchOutcome::BuildStarted(handle))
    }

    /// Parse a proxied delivery and dispatch it.
    pub async fn dispatch_envelope(
        &self,
        envelope: WebhookEnvelope,
    ) -> Result<DispatchOutcome, DispatchError> {
        let event = envelope.into_event()?;

        Ok(self.dispatch(&event).await?)
    }
}
