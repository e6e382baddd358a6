//! Dual HMAC request hashes for the signed upstream namespaces.
//!
//! Both digests are computed over canonicalized request metadata with one
//! shared timestamp, and both are mandatory on every signed path; the
//! upstream validates them independently.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{DomainError, DomainResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Secondary hash secret. Baked into the upstream mobile client build; it
/// is not distributed through configuration.
const SECONDARY_HASH_SECRET: &str = "9dc41b7a6f5e4c3d8b2a1f0e7c6d5b4a";

/// Headers attached to a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub hash: String,
    pub hash2: String,
    /// Milliseconds since epoch, string-encoded as the upstream expects.
    pub timestamp: String,
}

/// Signer for the upstream API namespaces that require request hashes.
pub struct ProxySigner {
    secret: Option<String>,
    platform: String,
    device_identifier: String,
}

impl ProxySigner {
    pub fn new(secret: Option<String>, platform: String, device_identifier: String) -> Self {
        Self {
            secret,
            platform,
            device_identifier,
        }
    }

    /// Compute both request hashes for one request.
    ///
    /// A missing primary secret is a configuration error: signing is never
    /// silently skipped on a path that requires it.
    pub fn sign(
        &self,
        method: &str,
        path: &str,
        vin: Option<&str>,
        timestamp_ms: i64,
    ) -> DomainResult<SignedHeaders> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            DomainError::Configuration(
                "Request-hash secret is not configured for a signed path".to_string(),
            )
        })?;

        let hash = primary_hash(method, path, vin, secret, timestamp_ms);
        let hash2 = secondary_hash(
            &self.platform,
            vin,
            &self.device_identifier,
            path,
            method,
            timestamp_ms,
        );

        Ok(SignedHeaders {
            hash,
            hash2,
            timestamp: timestamp_ms.to_string(),
        })
    }
}

/// `X-HASH`: HMAC-SHA256 over
/// `lowercase(method_/path[_vin]_secret_timestamp)`, Base64-encoded.
fn primary_hash(
    method: &str,
    path: &str,
    vin: Option<&str>,
    secret: &str,
    timestamp_ms: i64,
) -> String {
    let path = leading_slash_path(path);

    let mut parts: Vec<&str> = vec![method, &path];
    if let Some(vin) = vin {
        parts.push(vin);
    }
    let timestamp = timestamp_ms.to_string();
    parts.push(secret);
    parts.push(&timestamp);

    let message = parts.join("_").to_lowercase();
    hmac_base64(secret.as_bytes(), &message)
}

/// `X-HASH-2`: HMAC-SHA256 over
/// `lowercase(platform[_vin]_device_path-with-underscores_method_timestamp)`
/// keyed with the baked-in secondary secret, Base64-encoded.
fn secondary_hash(
    platform: &str,
    vin: Option<&str>,
    device_identifier: &str,
    path: &str,
    method: &str,
    timestamp_ms: i64,
) -> String {
    let flattened_path = strip_query(path)
        .replace('/', "_")
        .trim_start_matches('_')
        .to_string();

    let mut parts: Vec<&str> = vec![platform];
    if let Some(vin) = vin {
        parts.push(vin);
    }
    let timestamp = timestamp_ms.to_string();
    parts.push(device_identifier);
    parts.push(&flattened_path);
    parts.push(method);
    parts.push(&timestamp);

    let message = parts.join("_").to_lowercase();
    hmac_base64(SECONDARY_HASH_SECRET.as_bytes(), &message)
}

fn hmac_base64(key: &[u8], message: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

fn strip_query(path: &str) -> &str {
    path.split('?').next().unwrap_or(path)
}

/// The primary hash canonicalizes to a leading-slash path with no query.
fn leading_slash_path(path: &str) -> String {
    let path = strip_query(path);
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMESTAMP: i64 = 1_700_000_000_123;

    fn signer() -> ProxySigner {
        ProxySigner::new(
            Some("shared-secret".to_string()),
            "VoltraDash".to_string(),
            "voltra-dashboard".to_string(),
        )
    }

    #[test]
    fn test_hashes_are_deterministic() {
        let first = signer()
            .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
            .unwrap();
        let second = signer()
            .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.timestamp, "1700000000123");
    }

    #[test]
    fn test_every_input_perturbs_the_primary_hash() {
        let base = signer()
            .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
            .unwrap();

        let variants = [
            signer().sign("GET", "telemetry/app/ping", Some("VIN123"), TIMESTAMP),
            signer().sign("POST", "telemetry/app/pong", Some("VIN123"), TIMESTAMP),
            signer().sign("POST", "telemetry/app/ping", Some("VIN124"), TIMESTAMP),
            signer().sign("POST", "telemetry/app/ping", None, TIMESTAMP),
            signer().sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP + 1),
        ];
        for variant in variants {
            assert_ne!(base.hash, variant.unwrap().hash);
        }

        let other_secret = ProxySigner::new(
            Some("other-secret".to_string()),
            "VoltraDash".to_string(),
            "voltra-dashboard".to_string(),
        );
        assert_ne!(
            base.hash,
            other_secret
                .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
                .unwrap()
                .hash
        );
    }

    #[test]
    fn test_primary_hash_ignores_query_and_leading_slash() {
        let bare = signer()
            .sign("GET", "vehicle/get-alias", None, TIMESTAMP)
            .unwrap();
        let slashed = signer()
            .sign("GET", "/vehicle/get-alias?version=1.0", None, TIMESTAMP)
            .unwrap();
        assert_eq!(bare.hash, slashed.hash);
    }

    #[test]
    fn test_hashes_use_distinct_secrets_and_layouts() {
        let headers = signer()
            .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
            .unwrap();
        assert_ne!(headers.hash, headers.hash2);
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let unconfigured = ProxySigner::new(
            None,
            "VoltraDash".to_string(),
            "voltra-dashboard".to_string(),
        );
        let result = unconfigured.sign("GET", "vehicle/get-alias", None, TIMESTAMP);
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }

    #[test]
    fn test_both_hashes_are_base64() {
        let headers = signer()
            .sign("POST", "telemetry/app/ping", Some("VIN123"), TIMESTAMP)
            .unwrap();
        assert!(BASE64.decode(&headers.hash).is_ok());
        assert!(BASE64.decode(&headers.hash2).is_ok());
    }
}
