use serde::Deserialize;

/// Short-lived broker credentials issued by the token endpoint.
///
/// Owned by the credential provider; signers only ever borrow them.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub identity_id: Option<String>,
    /// Expiry as epoch milliseconds, normalized from whatever the token
    /// endpoint returned.
    pub expires_at_ms: i64,
}

impl BrokerCredentials {
    /// True when the credentials expire within `margin_ms` of `now_ms`.
    pub fn expires_within(&self, margin_ms: i64, now_ms: i64) -> bool {
        self.expires_at_ms <= now_ms + margin_ms
    }
}

/// Raw payload shape of the credential endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPayload {
    #[serde(default)]
    pub access_key_id: String,
    #[serde(default)]
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: String,
    #[serde(default)]
    pub identity_id: Option<String>,
    #[serde(default)]
    pub expiration: Option<ExpirationStamp>,
}

/// The token endpoint reports expiry as epoch seconds, epoch milliseconds,
/// or an RFC 3339 timestamp depending on its version.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExpirationStamp {
    Epoch(f64),
    Timestamp(String),
}

/// Fallback lifetime assumed when the endpoint sends no parsable expiry.
const DEFAULT_CREDENTIAL_LIFETIME_MS: i64 = 60 * 60 * 1000;

/// Epoch values below this are treated as seconds rather than milliseconds.
const EPOCH_MILLIS_THRESHOLD: f64 = 1e12;

/// Normalize a reported expiration to epoch milliseconds.
pub fn normalize_expiration(stamp: Option<&ExpirationStamp>, now_ms: i64) -> i64 {
    match stamp {
        Some(ExpirationStamp::Epoch(value)) if value.is_finite() && *value > 0.0 => {
            if *value > EPOCH_MILLIS_THRESHOLD {
                *value as i64
            } else {
                (*value * 1000.0) as i64
            }
        }
        Some(ExpirationStamp::Timestamp(text)) => {
            match chrono::DateTime::parse_from_rfc3339(text) {
                Ok(parsed) => parsed.timestamp_millis(),
                Err(_) => now_ms + DEFAULT_CREDENTIAL_LIFETIME_MS,
            }
        }
        _ => now_ms + DEFAULT_CREDENTIAL_LIFETIME_MS,
    }
}
