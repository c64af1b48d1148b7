//! Minimal AWS JSON 1.1 protocol client.
//!
//! SSM and CodeBuild both speak the same protocol: a signed `POST /` with an
//! `X-Amz-Target` header naming the operation and a JSON body.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use super::credentials::CredentialsProvider;
use super::sigv4::{authorization_header, SigningParams};
use crate::config::AwsSettings;

const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

/// Failure calling an AWS service.
#[derive(Debug, Error)]
pub enum AwsError {
    #[error("no AWS credential source is configured")]
    MissingCredentials,

    #[error("AWS credentials from {provider} unavailable: {message}")]
    CredentialSource {
        provider: &'static str,
        message: String,
    },

    #[error("invalid AWS endpoint URL {url:?}: {message}")]
    InvalidEndpoint { url: String, message: String },

    #[error("request to {service} failed: {source}")]
    Http {
        service: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} rejected the request ({status} {code}): {message}")]
    Service {
        service: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("unexpected response from {service}: {source}")]
    Decode {
        service: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Error body returned by JSON 1.1 services.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "__type", default)]
    error_type: String,
    #[serde(alias = "Message", default)]
    message: String,
}

/// Strip the namespace from `__type`, e.g. `com.amazon.coral#AccessDenied`.
fn error_code(error_type: &str) -> String {
    error_type
        .rsplit('#')
        .next()
        .unwrap_or(error_type)
        .split(':')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Where a request for one service goes.
#[derive(Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    /// Signed `host` header; must match what the HTTP client sends.
    pub host: String,
    pub path: String,
}

/// Signed JSON 1.1 client shared by the SSM and CodeBuild adapters.
#[derive(Clone)]
pub struct AwsJsonClient {
    http: Client,
    region: String,
    endpoint_override: Option<Url>,
    credentials: Arc<CredentialsProvider>,
}

impl AwsJsonClient {
    pub fn new(settings: &AwsSettings, timeout: Duration) -> Result<Self, AwsError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| AwsError::Http {
                service: "aws".to_string(),
                source,
            })?;

        let endpoint_override = settings
            .endpoint_url
            .as_deref()
            .map(|url| {
                Url::parse(url).map_err(|e| AwsError::InvalidEndpoint {
                    url: url.to_string(),
                    message: e.to_string(),
                })
            })
            .transpose()?;

        let credentials = Arc::new(CredentialsProvider::from_settings(http.clone(), settings));

        Ok(Self {
            http,
            region: settings.region.clone(),
            endpoint_override,
            credentials,
        })
    }

    pub fn credential_sources(&self) -> Vec<&'static str> {
        self.credentials.source_names()
    }

    /// Regional endpoint for a service, unless an override is configured.
    pub fn endpoint(&self, service: &str) -> Endpoint {
        match &self.endpoint_override {
            Some(url) => {
                let mut host = url.host_str().unwrap_or_default().to_string();
                if let Some(port) = url.port() {
                    host = format!("{}:{}", host, port);
                }
                Endpoint {
                    url: url.to_string(),
                    host,
                    path: url.path().to_string(),
                }
            }
            None => {
                let host = format!("{}.{}.amazonaws.com", service, self.region);
                Endpoint {
                    url: format!("https://{}/", host),
                    host,
                    path: "/".to_string(),
                }
            }
        }
    }

    /// Invoke `target` on `service` with a JSON request body.
    pub async fn call<Req, Resp>(
        &self,
        service: &str,
        target: &str,
        request: &Req,
    ) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let credentials = self.credentials.credentials().await?;
        let body = serde_json::to_vec(request).map_err(|source| AwsError::Decode {
            service: service.to_string(),
            source,
        })?;

        let endpoint = self.endpoint(service);
        let params = SigningParams {
            credentials: &credentials,
            region: &self.region,
            service,
            time: Utc::now(),
        };

        let mut headers = vec![
            ("content-type".to_string(), CONTENT_TYPE.to_string()),
            ("host".to_string(), endpoint.host.clone()),
            ("x-amz-date".to_string(), params.amz_date()),
            ("x-amz-target".to_string(), target.to_string()),
        ];
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        let authorization =
            authorization_header(&params, "POST", &endpoint.path, &headers, &body);

        let mut request = self
            .http
            .post(&endpoint.url)
            .header("authorization", authorization)
            .body(body);
        for (key, value) in headers.iter().filter(|(k, _)| k != "host") {
            request = request.header(key.as_str(), value.as_str());
        }

        info!(service = service, operation = target, "aws_request_starting");

        let response = request.send().await.map_err(|source| {
            error!(service = service, operation = target, error = %source, "aws_request_failed");
            AwsError::Http {
                service: service.to_string(),
                source,
            }
        })?;

        let status = response.status();
        let bytes = response.bytes().await.map_err(|source| AwsError::Http {
            service: service.to_string(),
            source,
        })?;

        if !status.is_success() {
            let err = service_error(service, status.as_u16(), &bytes);
            error!(service = service, operation = target, error = %err, "aws_request_rejected");
            return Err(err);
        }

        serde_json::from_slice(&bytes).map_err(|source| AwsError::Decode {
            service: service.to_string(),
            source,
        })
    }
}

fn service_error(service: &str, status: u16, body: &[u8]) -> AwsError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or(ErrorBody {
        error_type: String::new(),
        message: String::from_utf8_lossy(body).into_owned(),
    });

    AwsError::Service {
        service: service.to_string(),
        status,
        code: error_code(&parsed.error_type),
        message: parsed.message,
    }
}
