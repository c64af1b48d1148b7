//! AWS service adapters.
//!
//! Both services are reached over the JSON 1.1 protocol with SigV4 signed
//! requests; no SDK is involved. Credentials come from a refreshing chain
//! in [`credentials`].

pub mod client;
pub mod codebuild;
pub mod credentials;
pub mod sigv4;
pub mod ssm;

pub use client::{AwsError, AwsJsonClient, Endpoint};
pub use credentials::{CredentialSource, Credentials, CredentialsProvider};
pub use codebuild::{
    BuildService, CodeBuildClient, EnvironmentVariable, StartBuildInput, StartedBuild,
};
pub use ssm::{ParameterStore, SsmParameterStore};
