//! CI Gatekeeper - GitHub webhook authorizer and build dispatcher.
//!
//! Two independent flows share this library:
//! - **Authorization**: is the caller inside one of GitHub's published
//!   `hooks` ranges? Produces an allow/deny policy for the gateway.
//! - **Dispatch**: turns `push` and `pull_request` deliveries into CodeBuild
//!   runs for the configured repository.
//!
//! ## Architecture
//!
//! ```text
//! Gateway → /authorize → AddressValidator → SSM token + GitHub /meta
//! GitHub  → /webhooks/github → WebhookEvent → Dispatcher → BuildTrigger → CodeBuild
//! ```

pub mod authorize;
pub mod aws;
pub mod config;
pub mod dispatch;
pub mod github;
pub mod net;
pub mod web;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use authorize::{authorize, AccessDecision, AddressValidator, AuthorizationDecision};
pub use config::{BuildSettings, Config};
pub use dispatch::{BuildTrigger, DispatchOutcome, Dispatcher, WebhookEvent};
pub use net::IpRange;
pub use web::AppState;
