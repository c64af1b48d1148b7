//! Address validation against GitHub's published webhook ranges.

use std::net::IpAddr;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use crate::aws::{AwsError, ParameterStore};
use crate::github::{MetaError, MetadataSource};
use crate::net::{IpRange, RangeParseError};

/// Why the trusted range set could not be obtained.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to read token parameter: {0}")]
    Token(#[source] AwsError),

    #[error("failed to fetch metadata: {0}")]
    Metadata(#[source] MetaError),

    #[error("metadata lists an invalid range: {0}")]
    Range(#[source] RangeParseError),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("invalid network address {0:?}")]
    InvalidAddress(String),

    #[error("trusted ranges unavailable: {0}")]
    UpstreamUnavailable(#[from] UpstreamError),
}

/// Checks caller addresses against the `hooks` ranges.
///
/// Nothing is cached: each check reads the token and fetches the ranges.
#[derive(Clone)]
pub struct AddressValidator {
    store: Arc<dyn ParameterStore>,
    meta: Arc<dyn MetadataSource>,
    token_parameter: String,
}

impl AddressValidator {
    pub fn new(
        store: Arc<dyn ParameterStore>,
        meta: Arc<dyn MetadataSource>,
        token_parameter: impl Into<String>,
    ) -> Self {
        Self {
            store,
            meta,
            token_parameter: token_parameter.into(),
        }
    }

    /// Whether `address` is inside any currently published range.
    pub async fn is_trusted(&self, address: &str) -> Result<bool, ValidationError> {
        let addr: IpAddr = address.trim().parse().map_err(|_| {
            error!(address = %address, "address_invalid");
            ValidationError::InvalidAddress(address.to_string())
        })?;

        let ranges = self.trusted_ranges().await?;

        let matched = ranges.iter().find(|range| range.contains(addr));
        match matched {
            Some(range) => {
                info!(address = %addr, range = %range, "address_trusted");
                Ok(true)
            }
            None => {
                info!(address = %addr, ranges_checked = ranges.len(), "address_not_trusted");
                Ok(false)
            }
        }
    }

    /// Fetch and parse the current range set.
    pub async fn trusted_ranges(&self) -> Result<Vec<IpRange>, UpstreamError> {
        let token = self
            .store
            .get_secret(&self.token_parameter)
            .await
            .map_err(|e| {
                error!(parameter = %self.token_parameter, error = %e, "token_parameter_failed");
                UpstreamError::Token(e)
            })?;

        info!(parameter = %self.token_parameter, "github_token_retrieved");

        let raw = self.meta.hook_ranges(&token).await.map_err(|e| {
            error!(error = %e, "hook_ranges_failed");
            UpstreamError::Metadata(e)
        })?;

        raw.iter()
            .map(|r| r.parse::<IpRange>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                error!(error = %e, "hook_range_invalid");
                UpstreamError::Range(e)
            })
    }
}
