//! Starts the configured build job for a branch and commit.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::aws::{AwsError, BuildService, EnvironmentVariable, StartBuildInput};
use crate::config::BuildSettings;

/// Parameters of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    pub account: String,
    pub repo: String,
    pub branch: String,
    pub commit: String,
}

impl BuildRequest {
    /// The four plain-text overrides the build job reads.
    pub fn environment(&self) -> Vec<EnvironmentVariable> {
        vec![
            EnvironmentVariable::plaintext("GIT_ACCOUNT", self.account.as_str()),
            EnvironmentVariable::plaintext("GIT_REPO", self.repo.as_str()),
            EnvironmentVariable::plaintext("GIT_BRANCH", self.branch.as_str()),
            EnvironmentVariable::plaintext("GIT_COMMIT", self.commit.as_str()),
        ]
    }
}

/// Identifier of a started build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandle(pub String);

impl std::fmt::Display for BuildHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
#[error("build service rejected {project}: {source}")]
pub struct BuildError {
    pub project: String,
    #[source]
    pub source: AwsError,
}

/// Single-attempt build starter for one project.
#[derive(Clone)]
pub struct BuildTrigger {
    settings: BuildSettings,
    service: Arc<dyn BuildService>,
}

impl BuildTrigger {
    pub fn new(settings: &BuildSettings, service: Arc<dyn BuildService>) -> Self {
        Self {
            settings: settings.clone(),
            service,
        }
    }

    /// Fill in the configured repository for a branch/commit pair.
    pub fn request_for(&self, branch: &str, commit: &str) -> BuildRequest {
        BuildRequest {
            account: self.settings.git_account.clone(),
            repo: self.settings.git_repo.clone(),
            branch: branch.to_string(),
            commit: commit.to_string(),
        }
    }

    pub async fn start_build(&self, request: &BuildRequest) -> Result<BuildHandle, BuildError> {
        let input = StartBuildInput {
            project_name: self.settings.project_name.clone(),
            environment_variables_override: request.environment(),
        };

        match self.service.start_build(&input).await {
            Ok(build) => {
                info!(
                    project = %self.settings.project_name,
                    branch = %request.branch,
                    commit = %request.commit,
                    build_id = %build.id,
                    "build_started"
                );
                Ok(BuildHandle(build.id))
            }
            Err(source) => {
                error!(
                    project = %self.settings.project_name,
                    branch = %request.branch,
                    commit = %request.commit,
                    error = %source,
                    "build_start_failed"
                );
                Err(BuildError {
                    project: self.settings.project_name.clone(),
                    source,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aws::codebuild::VariableKind;
    use crate::testing::RecordingBuildService;

    fn settings() -> BuildSettings {
        BuildSettings {
            project_name: "widgets-ci".to_string(),
            git_account: "octo".to_string(),
            git_repo: "widgets".to_string(),
        }
    }

    #[tokio::test]
    async fn test_start_build_passes_four_plaintext_parameters() {
        let service = Arc::new(RecordingBuildService::accepting());
        let trigger = BuildTrigger::new(&settings(), service.clone());

        let handle = trigger
            .start_build(&trigger.request_for("main", "abc123"))
            .await
            .unwrap();
        assert_eq!(handle, BuildHandle("widgets-ci:build-1".to_string()));

        let started = service.started();
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].project_name, "widgets-ci");

        let vars: Vec<(&str, &str)> = started[0]
            .environment_variables_override
            .iter()
            .map(|v| (v.name.as_str(), v.value.as_str()))
            .collect();
        assert_eq!(
            vars,
            vec![
                ("GIT_ACCOUNT", "octo"),
                ("GIT_REPO", "widgets"),
                ("GIT_BRANCH", "main"),
                ("GIT_COMMIT", "abc123"),
            ]
        );
        assert!(started[0]
            .environment_variables_override
            .iter()
            .all(|v| v.kind == VariableKind::Plaintext));
    }

    #[tokio::test]
    async fn test_repeated_requests_are_not_deduplicated() {
        let service = Arc::new(RecordingBuildService::accepting());
        let trigger = BuildTrigger::new(&settings(), service.clone());
        let request = trigger.request_for("main", "abc123");

        trigger.start_build(&request).await.unwrap();
        trigger.start_build(&request).await.unwrap();

        assert_eq!(service.started().len(), 2);
    }

    #[tokio::test]
    async fn test_rejection_surfaces_as_build_error() {
        let service = Arc::new(RecordingBuildService::rejecting("ThrottlingException"));
        let trigger = BuildTrigger::new(&settings(), service);

        let err = trigger
            .start_build(&trigger.request_for("main", "abc123"))
            .await
            .unwrap_err();

        assert_eq!(err.project, "widgets-ci");
        assert!(matches!(
            err.source,
            AwsError::Service { ref code, .. } if code == "ThrottlingException"
        ));
    }
}
