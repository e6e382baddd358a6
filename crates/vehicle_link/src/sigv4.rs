//! SigV4-style signing of the broker WebSocket URL.
//!
//! The algorithm is wire-compatible with the broker's device gateway and
//! must not be restructured: canonical request, string-to-sign, chained-HMAC
//! key derivation, hex signature appended as a query parameter. The session
//! token is intentionally excluded from the signed canonical query and
//! appended after the signature, a quirk of this broker's auth scheme.

use chrono::{DateTime, Utc};
use common::BrokerCredentials;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "iotdevicegateway";
const SIGNED_PATH: &str = "/mqtt";
const URL_EXPIRES_SECONDS: u32 = 86_400;

/// Inputs for one signing operation. The timestamp is injected so output is
/// reproducible under test.
#[derive(Debug, Clone)]
pub struct BrokerSigningRequest<'a> {
    pub endpoint: &'a str,
    pub region: &'a str,
    pub credentials: &'a BrokerCredentials,
    pub now: DateTime<Utc>,
}

/// Compute the signed `wss://` URL for the broker's MQTT WebSocket listener.
pub fn sign_websocket_url(request: &BrokerSigningRequest<'_>) -> String {
    let date_stamp = request.now.format("%Y%m%d").to_string();
    let amz_date = request.now.format("%Y%m%dT%H%M%SZ").to_string();
    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, request.region, SERVICE);

    let mut query_parts = vec![
        format!("X-Amz-Algorithm={}", ALGORITHM),
        format!(
            "X-Amz-Credential={}",
            percent_encode(&format!(
                "{}/{}",
                request.credentials.access_key_id, credential_scope
            ))
        ),
        format!("X-Amz-Date={}", amz_date),
        format!("X-Amz-Expires={}", URL_EXPIRES_SECONDS),
        "X-Amz-SignedHeaders=host".to_string(),
    ];
    query_parts.sort();
    let canonical_query = query_parts.join("&");

    let canonical_request = format!(
        "GET\n{}\n{}\nhost:{}\n\nhost\n{}",
        SIGNED_PATH,
        canonical_query,
        request.endpoint,
        hex::encode(Sha256::digest(b""))
    );

    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        credential_scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let signing_key = derive_signing_key(
        &request.credentials.secret_access_key,
        &date_stamp,
        request.region,
    );
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    let mut url = format!(
        "wss://{}{}?{}&X-Amz-Signature={}",
        request.endpoint, SIGNED_PATH, canonical_query, signature
    );
    if !request.credentials.session_token.is_empty() {
        url.push_str("&X-Amz-Security-Token=");
        url.push_str(&percent_encode(&request.credentials.session_token));
    }
    url
}

/// Chained-HMAC signing key: "AWS4"+secret, then date, region, service,
/// and the literal "aws4_request", in that order.
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + secret_key.len());
    key.extend_from_slice(b"AWS4");
    key.extend_from_slice(secret_key.as_bytes());
    let k_date = hmac_sha256(&key, date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, SERVICE.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}

/// RFC 3986 percent-encoding over everything outside the unreserved set.
fn percent_encode(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for &byte in segment.as_bytes() {
        if matches!(byte,
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~'
        ) {
            encoded.push(byte as char);
        } else {
            encoded.push('%');
            encoded.push_str(&format!("{:02X}", byte));
        }
    }
    encoded
}
