//! Caller authorization: is this request coming from GitHub?
//!
//! ```text
//! AuthorizerRequest → authorize() → AddressValidator → (SSM token, GitHub /meta)
//! ```

pub mod handler;
pub mod validator;

pub use handler::{
    authorize, authorize_request, AccessDecision, AuthorizationDecision, AuthorizeError,
    AuthorizerRequest, DenyReason, Effect, PolicyDocument, RequestContext, Statement,
};
pub use validator::{AddressValidator, UpstreamError, ValidationError};
