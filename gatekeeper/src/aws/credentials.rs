//! AWS credential resolution.
//!
//! Sources are tried in order: static keys from the environment, the ECS
//! container credentials endpoint, then EC2 instance metadata (IMDSv2).
//! Temporary credentials are cached and fetched again shortly before
//! they expire.
//! Reference: https://docs.aws.amazon.com/sdkref/latest/guide/standardized-credentials.html

use std::fmt;
use std::time::Duration;

use chrono::Duration as TimeDelta;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::AwsError;
use crate::config::AwsSettings;

/// Refresh this many minutes before the reported expiry.
const REFRESH_WINDOW_MINUTES: i64 = 5;

/// Metadata endpoints are link-local; anything slower is not there.
const METADATA_TIMEOUT: Duration = Duration::from_secs(2);

const IMDS_TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const IMDS_TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const IMDS_TOKEN_TTL_SECONDS: &str = "21600";

/// Keys used to sign a request.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    /// `None` for long-lived keys.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at - TimeDelta::minutes(REFRESH_WINDOW_MINUTES) > now,
            None => true,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("has_session_token", &self.session_token.is_some())
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum CredentialSource {
    Static(Credentials),
    Container {
        uri: String,
        authorization: Option<String>,
    },
    InstanceMetadata {
        endpoint: String,
    },
}

impl CredentialSource {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialSource::Static(_) => "environment",
            CredentialSource::Container { .. } => "container",
            CredentialSource::InstanceMetadata { .. } => "instance_metadata",
        }
    }
}

/// Body served by both the container endpoint and IMDS.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TemporaryCredentials {
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<String>,
}

/// Credential chain with a shared cache.
pub struct CredentialsProvider {
    http: Client,
    sources: Vec<CredentialSource>,
    cached: RwLock<Option<Credentials>>,
}

impl CredentialsProvider {
    pub fn new(http: Client, sources: Vec<CredentialSource>) -> Self {
        Self {
            http,
            sources,
            cached: RwLock::new(None),
        }
    }

    /// Chain for whatever the environment configured.
    pub fn from_settings(http: Client, settings: &AwsSettings) -> Self {
        let mut sources = Vec::new();

        if let (Some(id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            sources.push(CredentialSource::Static(Credentials {
                access_key_id: id.clone(),
                secret_access_key: secret.clone(),
                session_token: settings.session_token.clone(),
                expires_at: None,
            }));
        }
        if let Some(uri) = &settings.container_credentials_uri {
            sources.push(CredentialSource::Container {
                uri: uri.clone(),
                authorization: settings.container_authorization_token.clone(),
            });
        }
        if let Some(endpoint) = &settings.imds_endpoint {
            sources.push(CredentialSource::InstanceMetadata {
                endpoint: endpoint.trim_end_matches('/').to_string(),
            });
        }

        Self::new(http, sources)
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(CredentialSource::name).collect()
    }

    /// Current credentials, resolving the chain again when the cached set
    /// is missing or about to expire.
    pub async fn credentials(&self) -> Result<Credentials, AwsError> {
        if let Some(credentials) = self.cached.read().await.as_ref() {
            if credentials.is_fresh(Utc::now()) {
                return Ok(credentials.clone());
            }
        }

        let mut cached = self.cached.write().await;

        // Another request may have refreshed while we waited for the lock
        if let Some(credentials) = cached.as_ref() {
            if credentials.is_fresh(Utc::now()) {
                return Ok(credentials.clone());
            }
        }

        let credentials = self.resolve().await?;
        *cached = Some(credentials.clone());
        Ok(credentials)
    }

    async fn resolve(&self) -> Result<Credentials, AwsError> {
        let mut last_error = None;

        for source in &self.sources {
            match self.fetch(source).await {
                Ok(credentials) => {
                    info!(
                        source = source.name(),
                        expires_at = ?credentials.expires_at,
                        "aws_credentials_resolved"
                    );
                    return Ok(credentials);
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "aws_credentials_source_failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(AwsError::MissingCredentials))
    }

    async fn fetch(&self, source: &CredentialSource) -> Result<Credentials, AwsError> {
        let provider = source.name();

        match source {
            CredentialSource::Static(credentials) => Ok(credentials.clone()),

            CredentialSource::Container { uri, authorization } => {
                let mut request = self.http.get(uri).timeout(METADATA_TIMEOUT);
                if let Some(token) = authorization {
                    request = request.header("Authorization", token);
                }
                let body = fetch_text(provider, request).await?;
                parse_temporary(provider, &body)
            }

            CredentialSource::InstanceMetadata { endpoint } => {
                let token = fetch_text(
                    provider,
                    self.http
                        .put(format!("{}/latest/api/token", endpoint))
                        .header(IMDS_TOKEN_TTL_HEADER, IMDS_TOKEN_TTL_SECONDS)
                        .timeout(METADATA_TIMEOUT),
                )
                .await?;
                let token = token.trim();

                let roles_url = format!("{}/latest/meta-data/iam/security-credentials/", endpoint);
                let roles = fetch_text(
                    provider,
                    self.http
                        .get(&roles_url)
                        .header(IMDS_TOKEN_HEADER, token)
                        .timeout(METADATA_TIMEOUT),
                )
                .await?;
                let role = roles
                    .lines()
                    .map(str::trim)
                    .find(|line| !line.is_empty())
                    .ok_or_else(|| AwsError::CredentialSource {
                        provider,
                        message: "no instance profile role attached".to_string(),
                    })?;

                let body = fetch_text(
                    provider,
                    self.http
                        .get(format!("{}{}", roles_url, role))
                        .header(IMDS_TOKEN_HEADER, token)
                        .timeout(METADATA_TIMEOUT),
                )
                .await?;
                parse_temporary(provider, &body)
            }
        }
    }
}

async fn fetch_text(provider: &'static str, request: RequestBuilder) -> Result<String, AwsError> {
    let failed = |message: String| AwsError::CredentialSource { provider, message };

    let response = request.send().await.map_err(|e| failed(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("status {}", status.as_u16())));
    }

    response.text().await.map_err(|e| failed(e.to_string()))
}

fn parse_temporary(provider: &'static str, body: &str) -> Result<Credentials, AwsError> {
    let failed = |message: String| AwsError::CredentialSource { provider, message };

    let raw: TemporaryCredentials =
        serde_json::from_str(body).map_err(|e| failed(e.to_string()))?;

    let expires_at = raw
        .expiration
        .as_deref()
        .map(DateTime::parse_from_rfc3339)
        .transpose()
        .map_err(|e| failed(format!("invalid Expiration: {}", e)))?
        .map(|t| t.with_timezone(&Utc));

    Ok(Credentials {
        access_key_id: raw.access_key_id,
        secret_access_key: raw.secret_access_key,
        session_token: raw.token,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, put};
    use axum::Router;

    use super::*;
    use crate::testing::serve;

    fn temporary_body(key: &str, expires_at: DateTime<Utc>) -> String {
        serde_json::json!({
            "AccessKeyId": key,
            "SecretAccessKey": "secret",
            "Token": "session",
            "Expiration": expires_at.to_rfc3339(),
        })
        .to_string()
    }

    /// Container endpoint that counts hits and serves credentials expiring
    /// `ttl` after each request.
    async fn container_endpoint(ttl: TimeDelta) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/v2/credentials/task",
                get(
                    |State((hits, ttl)): State<(Arc<AtomicUsize>, TimeDelta)>,
                     headers: HeaderMap| async move {
                        let n = hits.fetch_add(1, Ordering::SeqCst) + 1;
                        if headers.get("authorization").and_then(|v| v.to_str().ok())
                            != Some("task-token")
                        {
                            return (StatusCode::FORBIDDEN, String::new());
                        }
                        (StatusCode::OK, temporary_body(&format!("ASIA{n}"), Utc::now() + ttl))
                    },
                ),
            )
            .with_state((hits.clone(), ttl));

        let addr = serve(app).await;
        (format!("http://{}/v2/credentials/task", addr), hits)
    }

    fn container_provider(uri: String) -> CredentialsProvider {
        CredentialsProvider::new(
            Client::new(),
            vec![CredentialSource::Container {
                uri,
                authorization: Some("task-token".to_string()),
            }],
        )
    }

    #[test]
    fn test_from_settings_orders_sources() {
        let settings = AwsSettings {
            access_key_id: Some("AKID".to_string()),
            secret_access_key: Some("secret".to_string()),
            container_credentials_uri: Some("http://169.254.170.2/v2/credentials/x".to_string()),
            imds_endpoint: Some("http://169.254.169.254/".to_string()),
            ..AwsSettings::default()
        };
        let provider = CredentialsProvider::from_settings(Client::new(), &settings);
        assert_eq!(
            provider.source_names(),
            vec!["environment", "container", "instance_metadata"]
        );
    }

    #[test]
    fn test_static_keys_need_both_halves() {
        let settings = AwsSettings {
            access_key_id: Some("AKID".to_string()),
            ..AwsSettings::default()
        };
        let provider = CredentialsProvider::from_settings(Client::new(), &settings);
        assert!(provider.source_names().is_empty());
    }

    #[tokio::test]
    async fn test_no_sources_is_missing_credentials() {
        let provider = CredentialsProvider::new(Client::new(), Vec::new());
        assert!(matches!(
            provider.credentials().await,
            Err(AwsError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_container_credentials_are_cached_while_fresh() {
        let (uri, hits) = container_endpoint(TimeDelta::hours(6)).await;
        let provider = container_provider(uri);

        let first = provider.credentials().await.unwrap();
        let second = provider.credentials().await.unwrap();

        assert_eq!(first.access_key_id, "ASIA1");
        assert_eq!(first.session_token.as_deref(), Some("session"));
        assert!(first.expires_at.is_some());
        assert_eq!(second, first);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expiring_credentials_are_refreshed() {
        let (uri, hits) = container_endpoint(TimeDelta::minutes(1)).await;
        let provider = container_provider(uri);

        let first = provider.credentials().await.unwrap();
        let second = provider.credentials().await.unwrap();

        assert_eq!(first.access_key_id, "ASIA1");
        assert_eq!(second.access_key_id, "ASIA2");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_source_falls_through_to_next() {
        let (uri, _) = container_endpoint(TimeDelta::hours(6)).await;
        let provider = CredentialsProvider::new(
            Client::new(),
            vec![
                CredentialSource::Container {
                    uri: uri.clone(),
                    authorization: Some("wrong".to_string()),
                },
                CredentialSource::Container {
                    uri,
                    authorization: Some("task-token".to_string()),
                },
            ],
        );

        let credentials = provider.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "ASIA2");
    }

    #[tokio::test]
    async fn test_all_sources_failing_reports_last_error() {
        let (uri, _) = container_endpoint(TimeDelta::hours(6)).await;
        let provider = CredentialsProvider::new(
            Client::new(),
            vec![CredentialSource::Container {
                uri,
                authorization: None,
            }],
        );

        match provider.credentials().await {
            Err(AwsError::CredentialSource { provider, message }) => {
                assert_eq!(provider, "container");
                assert_eq!(message, "status 403");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_instance_metadata_uses_session_token() {
        let app = Router::new()
            .route(
                "/latest/api/token",
                put(|headers: HeaderMap| async move {
                    match headers.get(IMDS_TOKEN_TTL_HEADER) {
                        Some(_) => (StatusCode::OK, "imds-token".to_string()),
                        None => (StatusCode::BAD_REQUEST, String::new()),
                    }
                }),
            )
            .route(
                "/latest/meta-data/iam/security-credentials/",
                get(|headers: HeaderMap| async move {
                    match headers.get(IMDS_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
                        Some("imds-token") => (StatusCode::OK, "gatekeeper-role\n".to_string()),
                        _ => (StatusCode::UNAUTHORIZED, String::new()),
                    }
                }),
            )
            .route(
                "/latest/meta-data/iam/security-credentials/gatekeeper-role",
                get(|headers: HeaderMap| async move {
                    match headers.get(IMDS_TOKEN_HEADER).and_then(|v| v.to_str().ok()) {
                        Some("imds-token") => (
                            StatusCode::OK,
                            temporary_body("ASIAIMDS", Utc::now() + TimeDelta::hours(6)),
                        ),
                        _ => (StatusCode::UNAUTHORIZED, String::new()),
                    }
                }),
            );
        let addr = serve(app).await;

        let provider = CredentialsProvider::new(
            Client::new(),
            vec![CredentialSource::InstanceMetadata {
                endpoint: format!("http://{}", addr),
            }],
        );

        let credentials = provider.credentials().await.unwrap();
        assert_eq!(credentials.access_key_id, "ASIAIMDS");
        assert_eq!(credentials.session_token.as_deref(), Some("session"));
    }

    #[test]
    fn test_parse_temporary_without_expiration() {
        let body = r#"{"AccessKeyId": "AKID", "SecretAccessKey": "s"}"#;
        let credentials = parse_temporary("container", body).unwrap();
        assert_eq!(credentials.expires_at, None);
        assert!(credentials.is_fresh(Utc::now()));
    }

    #[test]
    fn test_parse_temporary_bad_expiration() {
        let body = r#"{"AccessKeyId": "AKID", "SecretAccessKey": "s", "Expiration": "soon"}"#;
        assert!(matches!(
            parse_temporary("container", body),
            Err(AwsError::CredentialSource { .. })
        ));
    }

    #[test]
    fn test_debug_hides_secret() {
        let credentials = Credentials {
            access_key_id: "AKID".to_string(),
            secret_access_key: "very-secret".to_string(),
            session_token: Some("also-secret".to_string()),
            expires_at: None,
        };
        let rendered = format!("{:?}", credentials);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("also-secret"));
    }
}
