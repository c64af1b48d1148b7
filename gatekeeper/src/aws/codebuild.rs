//! CodeBuild adapter.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::client::{AwsError, AwsJsonClient};

/// A build environment variable override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentVariable {
    pub name: String,
    pub value: String,
    #[serde(rename = "type")]
    pub kind: VariableKind,
}

impl EnvironmentVariable {
    pub fn plaintext(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
            kind: VariableKind::Plaintext,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariableKind {
    Plaintext,
}

/// `StartBuild` input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBuildInput {
    pub project_name: String,
    pub environment_variables_override: Vec<EnvironmentVariable>,
}

/// A build the service accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StartedBuild {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct StartBuildOutput {
    build: StartedBuild,
}

/// Downstream build service.
#[async_trait]
pub trait BuildService: Send + Sync {
    async fn start_build(&self, input: &StartBuildInput) -> Result<StartedBuild, AwsError>;
}

/// Build service backed by AWS CodeBuild.
#[derive(Clone)]
pub struct CodeBuildClient {
    client: AwsJsonClient,
}

impl CodeBuildClient {
    pub fn new(client: AwsJsonClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BuildService for CodeBuildClient {
    async fn start_build(&self, input: &StartBuildInput) -> Result<StartedBuild, AwsError> {
        let output: StartBuildOutput = self
            .client
            .call("codebuild", "CodeBuild_20161006.StartBuild", input)
            .await?;

        info!(
            project = %input.project_name,
            build_id = %output.build.id,
            "codebuild_build_started"
        );

        Ok(output.build)
    }
}
