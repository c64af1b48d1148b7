//! GitHub webhook signature verification.
//!
//! GitHub signs each delivery with HMAC-SHA256 of the raw body, keyed with
//! the webhook secret, and sends it as `X-Hub-Signature-256: sha256=<hex>`.
//! Reference: https://docs.github.com/en/webhooks/using-webhooks/validating-webhook-deliveries

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify a GitHub webhook signature header against the raw body.
///
/// Returns `true` only if the header is present, well-formed and matches.
pub fn verify_github_signature(secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let header = match header {
        Some(h) if !h.trim().is_empty() => h.trim(),
        _ => {
            warn!("github_signature_missing");
            return false;
        }
    };

    let provided = match header.strip_prefix(SIGNATURE_PREFIX) {
        Some(hex) => hex,
        None => {
            warn!(header_length = header.len(), "github_signature_bad_format");
            return false;
        }
    };

    let expected = sign(secret, body);

    // Constant-time comparison to prevent timing attacks
    let valid = constant_time_compare(&expected, &provided.to_ascii_lowercase());

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = provided.len(),
            "github_signature_mismatch"
        );
    }

    valid
}

/// Hex HMAC-SHA256 of `body` keyed with `secret`.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => unreachable!("hmac accepts keys of any length"),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Check if delivery signature verification is enabled.
pub fn is_signature_verification_enabled(secret: &Option<String>) -> bool {
    secret
        .as_ref()
        .map(|k| !k.trim().is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_example() {
        // Example values from GitHub's webhook validation guide.
        assert_eq!(
            sign("It's a Secret to Everybody", b"Hello, World!"),
            "757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
        assert!(verify_github_signature(
            "It's a Secret to Everybody",
            b"Hello, World!",
            Some("sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"),
        ));
    }

    #[test]
    fn test_verify_round_trip() {
        let body = br#"{"zen":"Design for failure."}"#;
        let header = format!("sha256={}", sign("s3cret", body));
        assert!(verify_github_signature("s3cret", body, Some(&header)));
        assert!(!verify_github_signature("other", body, Some(&header)));
        assert!(!verify_github_signature("s3cret", b"tampered", Some(&header)));
    }

    #[test]
    fn test_verify_rejects_missing_or_malformed_header() {
        let body = b"{}";
        let digest = sign("s3cret", body);
        assert!(!verify_github_signature("s3cret", body, None));
        assert!(!verify_github_signature("s3cret", body, Some("")));
        assert!(!verify_github_signature("s3cret", body, Some(&digest)));
        assert!(!verify_github_signature(
            "s3cret",
            body,
            Some(&format!("sha1={}", digest))
        ));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }

    #[test]
    fn test_is_signature_verification_enabled() {
        assert!(!is_signature_verification_enabled(&None));
        assert!(!is_signature_verification_enabled(&Some("".to_string())));
        assert!(!is_signature_verification_enabled(&Some("   ".to_string())));
        assert!(is_signature_verification_enabled(&Some("key123".to_string())));
    }
}
