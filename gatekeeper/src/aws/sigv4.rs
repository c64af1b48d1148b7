//! AWS Signature Version 4 request signing.
//!
//! Requests to SSM and CodeBuild are signed with HMAC-SHA256 over a
//! canonical form of the request.
//! Reference: https://docs.aws.amazon.com/IAM/latest/UserGuide/reference_sigv-create-signed-request.html

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use super::credentials::Credentials;

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Everything besides the request itself that goes into a signature.
pub struct SigningParams<'a> {
    pub credentials: &'a Credentials,
    pub region: &'a str,
    pub service: &'a str,
    pub time: DateTime<Utc>,
}

impl SigningParams<'_> {
    /// `x-amz-date` header value, e.g. `20150830T123600Z`.
    pub fn amz_date(&self) -> String {
        self.time.format("%Y%m%dT%H%M%SZ").to_string()
    }

    fn short_date(&self) -> String {
        self.time.format("%Y%m%d").to_string()
    }

    fn scope(&self) -> String {
        format!(
            "{}/{}/{}/aws4_request",
            self.short_date(),
            self.region,
            self.service
        )
    }
}

/// Compute the `Authorization` header value for a request.
///
/// `headers` must already contain `host` and `x-amz-date`; every header
/// given is signed. Only requests without a query string are supported.
pub fn authorization_header(
    params: &SigningParams<'_>,
    method: &str,
    path: &str,
    headers: &[(String, String)],
    payload: &[u8],
) -> String {
    let (canonical_headers, signed_headers) = canonicalize_headers(headers);

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method,
        path,
        canonical_headers,
        signed_headers,
        hex::encode(Sha256::digest(payload))
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        params.amz_date(),
        params.scope(),
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(
        &params.credentials.secret_access_key,
        &params.short_date(),
        params.region,
        params.service,
    );
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes()));

    format!(
        "{} Credential={}/{}, SignedHeaders={}, Signature={}",
        ALGORITHM,
        params.credentials.access_key_id,
        params.scope(),
        signed_headers,
        signature
    )
}

/// Lowercase, trim and sort headers; returns (canonical block, signed list).
fn canonicalize_headers(headers: &[(String, String)]) -> (String, String) {
    let mut normalized: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| {
            let value = v.split_whitespace().collect::<Vec<_>>().join(" ");
            (k.to_ascii_lowercase(), value)
        })
        .collect();
    normalized.sort();

    let canonical = normalized
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect::<String>();
    let signed = normalized
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    (canonical, signed)
}

/// Derive the per-day, per-region, per-service signing key.
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date.as_bytes());
    let k_region = hmac(&k_date, region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => unreachable!("hmac accepts keys of any length"),
    };
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}
