//! Configuration module for environment variable parsing.
//!
//! Everything is read once at process start into [`Config`] and passed by
//! reference to the components that need it.

use std::env;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Name of the SSM parameter holding the GitHub OAuth token.
pub const DEFAULT_TOKEN_PARAMETER: &str = "GitHubOAuthToken";

/// GitHub endpoint publishing the `hooks` source ranges.
pub const DEFAULT_META_URL: &str = "https://api.github.com/meta";

/// Host that `AWS_CONTAINER_CREDENTIALS_RELATIVE_URI` is resolved against.
pub const ECS_CREDENTIALS_HOST: &str = "http://169.254.170.2";

/// EC2 instance metadata service.
pub const DEFAULT_IMDS_ENDPOINT: &str = "http://169.254.169.254";

/// Missing configuration needed by a component.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// CodeBuild project started for build-worthy events
    pub codebuild_project_name: Option<String>,

    /// Static repository owner passed to every build
    pub git_account: Option<String>,

    /// Static repository name passed to every build
    pub git_repo: Option<String>,

    /// SSM parameter name of the GitHub token
    pub token_parameter: String,

    /// GitHub metadata endpoint
    pub github_meta_url: String,

    /// Secret for `X-Hub-Signature-256` verification of deliveries
    pub github_webhook_secret: Option<String>,

    /// HTTP request timeout in milliseconds
    pub request_timeout_ms: u64,

    pub aws: AwsSettings,
}

/// Region, endpoint and credential sources for AWS requests.
///
/// Static keys are only one source; see [`crate::aws::CredentialsProvider`]
/// for the container and instance metadata fallbacks.
#[derive(Clone, Default)]
pub struct AwsSettings {
    pub region: String,
    /// Replaces the regional endpoint for every service (e.g. LocalStack).
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    /// ECS task role credentials endpoint
    pub container_credentials_uri: Option<String>,
    pub container_authorization_token: Option<String>,
    /// `None` when `AWS_EC2_METADATA_DISABLED=true`
    pub imds_endpoint: Option<String>,
}

// Keeps secrets out of `config_loaded` style debug output.
impl std::fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSettings")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("access_key_id", &self.access_key_id)
            .field("has_secret_access_key", &self.secret_access_key.is_some())
            .field("has_session_token", &self.session_token.is_some())
            .field("container_credentials_uri", &self.container_credentials_uri)
            .field(
                "has_container_authorization_token",
                &self.container_authorization_token.is_some(),
            )
            .field("imds_endpoint", &self.imds_endpoint)
            .finish()
    }
}

/// Build job parameters that stay fixed for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSettings {
    pub project_name: String,
    pub git_account: String,
    pub git_repo: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),

            codebuild_project_name: non_empty("CODEBUILD_PROJECT_NAME"),

            git_account: non_empty("GIT_ACCOUNT"),

            git_repo: non_empty("GIT_REPO"),

            token_parameter: non_empty("GITHUB_TOKEN_PARAMETER")
                .unwrap_or_else(|| DEFAULT_TOKEN_PARAMETER.to_string()),

            github_meta_url: non_empty("GITHUB_META_URL")
                .unwrap_or_else(|| DEFAULT_META_URL.to_string()),

            github_webhook_secret: non_empty("GITHUB_WEBHOOK_SECRET"),

            request_timeout_ms: parse_u64("REQUEST_TIMEOUT_MS", 8000),

            aws: AwsSettings {
                region: non_empty("AWS_REGION")
                    .or_else(|| non_empty("AWS_DEFAULT_REGION"))
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint_url: non_empty("AWS_ENDPOINT_URL"),
                access_key_id: non_empty("AWS_ACCESS_KEY_ID"),
                secret_access_key: non_empty("AWS_SECRET_ACCESS_KEY"),
                session_token: non_empty("AWS_SESSION_TOKEN"),
                container_credentials_uri: container_credentials_uri(),
                container_authorization_token: non_empty("AWS_CONTAINER_AUTHORIZATION_TOKEN"),
                imds_endpoint: imds_endpoint(),
            },
        }
    }

    /// Outbound HTTP timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate and collect the build job parameters.
    pub fn build_settings(&self) -> Result<BuildSettings, ConfigError> {
        Ok(BuildSettings {
            project_name: self
                .codebuild_project_name
                .clone()
                .ok_or(ConfigError::MissingVar("CODEBUILD_PROJECT_NAME"))?,
            git_account: self
                .git_account
                .clone()
                .ok_or(ConfigError::MissingVar("GIT_ACCOUNT"))?,
            git_repo: self
                .git_repo
                .clone()
                .ok_or(ConfigError::MissingVar("GIT_REPO"))?,
        })
    }
}

/// Read a variable, treating blank values as unset.
fn non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The full URI wins over the relative one, as in the AWS SDKs.
fn container_credentials_uri() -> Option<String> {
    non_empty("AWS_CONTAINER_CREDENTIALS_FULL_URI").or_else(|| {
        non_empty("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI")
            .map(|path| format!("{}{}", ECS_CREDENTIALS_HOST, path))
    })
}

fn imds_endpoint() -> Option<String> {
    let disabled = non_empty("AWS_EC2_METADATA_DISABLED")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));
    if disabled {
        return None;
    }

    Some(
        non_empty("AWS_EC2_METADATA_SERVICE_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_IMDS_ENDPOINT.to_string()),
    )
}

fn parse_u64(name: &str, default: u64) -> u64 {
    let raw = match env::var(name) {
        Ok(v) => v,
        Err(_) => return default,
    };

    match raw.trim().parse::<u64>() {
        Ok(v) if v > 0 => v,
        _ => {
            warn!(env_var = name, value = %raw, "Invalid integer value, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_build(project: Option<&str>, account: Option<&str>, repo: Option<&str>) -> Config {
        Config {
            port: 8080,
            codebuild_project_name: project.map(str::to_string),
            git_account: account.map(str::to_string),
            git_repo: repo.map(str::to_string),
            token_parameter: DEFAULT_TOKEN_PARAMETER.to_string(),
            github_meta_url: DEFAULT_META_URL.to_string(),
            github_webhook_secret: None,
            request_timeout_ms: 8000,
            aws: AwsSettings::default(),
        }
    }

    #[test]
    fn test_non_empty_treats_blank_as_unset() {
        env::set_var("GATEKEEPER_TEST_BLANK", "   ");
        assert_eq!(non_empty("GATEKEEPER_TEST_BLANK"), None);
        env::remove_var("GATEKEEPER_TEST_BLANK");
    }

    #[test]
    fn test_non_empty_trims() {
        env::set_var("GATEKEEPER_TEST_TRIM", " value ");
        assert_eq!(non_empty("GATEKEEPER_TEST_TRIM"), Some("value".to_string()));
        env::remove_var("GATEKEEPER_TEST_TRIM");
    }

    #[test]
    fn test_parse_u64_default() {
        assert_eq!(parse_u64("GATEKEEPER_TEST_MISSING_U64", 42), 42);

        env::set_var("GATEKEEPER_TEST_BAD_U64", "soon");
        assert_eq!(parse_u64("GATEKEEPER_TEST_BAD_U64", 42), 42);
        env::remove_var("GATEKEEPER_TEST_BAD_U64");
    }

    #[test]
    fn test_build_settings_complete() {
        let config = config_with_build(Some("ci"), Some("octo"), Some("widgets"));
        let settings = config.build_settings().unwrap();
        assert_eq!(settings.project_name, "ci");
        assert_eq!(settings.git_account, "octo");
        assert_eq!(settings.git_repo, "widgets");
    }

    #[test]
    fn test_build_settings_missing_project() {
        let config = config_with_build(None, Some("octo"), Some("widgets"));
        assert_eq!(
            config.build_settings(),
            Err(ConfigError::MissingVar("CODEBUILD_PROJECT_NAME"))
        );
    }

    #[test]
    fn test_aws_settings_debug_hides_secret() {
        let aws = AwsSettings {
            region: "eu-west-1".to_string(),
            access_key_id: Some("AKID".to_string()),
            secret_access_key: Some("very-secret".to_string()),
            container_authorization_token: Some("task-secret".to_string()),
            ..AwsSettings::default()
        };
        let rendered = format!("{:?}", aws);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("task-secret"));
        assert!(rendered.contains("eu-west-1"));
    }

    // One test owns these variables so parallel tests never race on them.
    #[test]
    fn test_credential_source_variables() {
        env::remove_var("AWS_CONTAINER_CREDENTIALS_FULL_URI");
        env::set_var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI", "/v2/credentials/abc");
        assert_eq!(
            container_credentials_uri().as_deref(),
            Some("http://169.254.170.2/v2/credentials/abc")
        );

        env::set_var("AWS_CONTAINER_CREDENTIALS_FULL_URI", "http://localhost:9911/creds");
        assert_eq!(
            container_credentials_uri().as_deref(),
            Some("http://localhost:9911/creds")
        );
        env::remove_var("AWS_CONTAINER_CREDENTIALS_FULL_URI");
        env::remove_var("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI");
        assert_eq!(container_credentials_uri(), None);

        env::remove_var("AWS_EC2_METADATA_SERVICE_ENDPOINT");
        env::set_var("AWS_EC2_METADATA_DISABLED", "TRUE");
        assert_eq!(imds_endpoint(), None);
        env::set_var("AWS_EC2_METADATA_DISABLED", "false");
        assert_eq!(imds_endpoint().as_deref(), Some(DEFAULT_IMDS_ENDPOINT));
        env::remove_var("AWS_EC2_METADATA_DISABLED");
    }
}
