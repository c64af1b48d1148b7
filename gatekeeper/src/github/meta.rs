//! Client for GitHub's `/meta` endpoint.
//!
//! The endpoint publishes the source ranges GitHub uses for various
//! services; webhook deliveries originate from the `hooks` ranges.
//! Reference: https://docs.github.com/en/rest/meta/meta

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

const USER_AGENT: &str = concat!("ci-gatekeeper/", env!("CARGO_PKG_VERSION"));

/// Failure fetching or decoding the metadata document.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("malformed metadata document: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Only the field this service needs; everything else is ignored.
#[derive(Debug, Deserialize)]
struct MetaDocument {
    hooks: Vec<String>,
}

/// Source of the trusted webhook ranges.
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Fetch the `hooks` ranges as published, authenticating with `token`.
    async fn hook_ranges(&self, token: &str) -> Result<Vec<String>, MetaError>;
}

/// Live `/meta` client.
#[derive(Clone)]
pub struct GitHubMeta {
    http: Client,
    url: String,
}

impl GitHubMeta {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl MetadataSource for GitHubMeta {
    async fn hook_ranges(&self, token: &str) -> Result<Vec<String>, MetaError> {
        let response = self
            .http
            .get(&self.url)
            .header("Authorization", format!("OAuth {}", token))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|source| {
                error!(url = %self.url, error = %source, "github_meta_fetch_failed");
                MetaError::Http {
                    url: self.url.clone(),
                    source,
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(url = %self.url, status_code = status.as_u16(), "github_meta_bad_status");
            return Err(MetaError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| MetaError::Http {
            url: self.url.clone(),
            source,
        })?;

        let ranges = parse_hook_ranges(&body)?;

        info!(hook_ranges = ranges.len(), "github_meta_fetched");

        Ok(ranges)
    }
}

fn parse_hook_ranges(body: &[u8]) -> Result<Vec<String>, MetaError> {
    let document: MetaDocument = serde_json::from_slice(body).map_err(MetaError::Malformed)?;
    Ok(document.hooks)
}
