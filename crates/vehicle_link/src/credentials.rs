use anyhow::Context;
use async_trait::async_trait;
use common::{
    normalize_expiration, BrokerCredentials, CredentialPayload, CredentialSource, DomainError,
    DomainResult,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Credentials are refreshed once they are within this margin of expiry.
pub const CREDENTIAL_REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Caching provider for short-lived broker credentials.
///
/// Owns the single shared credential value; signers receive clones and never
/// mutate it.
pub struct CredentialProvider {
    source: Arc<dyn CredentialSource>,
    current: tokio::sync::Mutex<Option<BrokerCredentials>>,
}

impl CredentialProvider {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Return credentials valid for at least the refresh margin, fetching
    /// fresh ones from the token endpoint when needed.
    ///
    /// Idempotent: while the cached credentials expire more than five
    /// minutes in the future, no network call is made.
    pub async fn ensure_credentials(&self) -> DomainResult<BrokerCredentials> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut current = self.current.lock().await;

        if let Some(credentials) = current.as_ref() {
            if !credentials.expires_within(CREDENTIAL_REFRESH_MARGIN_MS, now_ms) {
                return Ok(credentials.clone());
            }
            debug!("broker credentials near expiry, refreshing");
        }

        let payload = self.source.fetch().await?;
        let credentials = validate_payload(payload, now_ms)?;

        info!(
            expires_at_ms = credentials.expires_at_ms,
            "obtained broker credentials"
        );
        *current = Some(credentials.clone());
        Ok(credentials)
    }
}

/// Validate the raw endpoint payload and normalize its expiry.
///
/// A missing or empty (after trimming) access key, secret key, or session
/// token is a configuration error, not a retryable condition.
fn validate_payload(payload: CredentialPayload, now_ms: i64) -> DomainResult<BrokerCredentials> {
    let access_key_id = payload.access_key_id.trim().to_string();
    let secret_access_key = payload.secret_access_key.trim().to_string();
    let session_token = payload.session_token.trim().to_string();

    if access_key_id.is_empty() || secret_access_key.is_empty() || session_token.is_empty() {
        return Err(DomainError::Configuration(
            "Credential endpoint returned an incomplete payload".to_string(),
        ));
    }

    Ok(BrokerCredentials {
        access_key_id,
        secret_access_key,
        session_token,
        identity_id: payload.identity_id,
        expires_at_ms: normalize_expiration(payload.expiration.as_ref(), now_ms),
    })
}

/// Credential source backed by the HTTP token endpoint.
pub struct HttpCredentialSource {
    client: reqwest::Client,
    url: String,
}

impl HttpCredentialSource {
    pub fn new(client: reqwest::Client, url: String) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> DomainResult<CredentialPayload> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| DomainError::CredentialFetch(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DomainError::CredentialFetch(format!(
                "token endpoint returned {}: {}",
                status.as_u16(),
                body.chars().take(200).collect::<String>()
            )));
        }

        let payload = response
            .json::<CredentialPayload>()
            .await
            .context("decoding credential endpoint payload")
            .map_err(DomainError::Internal)?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ExpirationStamp, MockCredentialSource};

    fn payload(expiry_ms: i64) -> CredentialPayload {
        CredentialPayload {
            access_key_id: "AKID".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: " token ".to_string(),
            identity_id: Some("identity".to_string()),
            expiration: Some(ExpirationStamp::Epoch(expiry_ms as f64)),
        }
    }

    #[tokio::test]
    async fn test_fetches_once_while_fresh() {
        let far_future = chrono::Utc::now().timestamp_millis() + 60 * 60 * 1000;
        let mut source = MockCredentialSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(move || Ok(payload(far_future)));

        let provider = CredentialProvider::new(Arc::new(source));
        let first = provider.ensure_credentials().await.unwrap();
        let second = provider.ensure_credentials().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.session_token, "token");
    }

    #[tokio::test]
    async fn test_refreshes_near_expiry() {
        let near = chrono::Utc::now().timestamp_millis() + 60 * 1000;
        let far = chrono::Utc::now().timestamp_millis() + 60 * 60 * 1000;
        let mut source = MockCredentialSource::new();
        let mut expiries = vec![near, far];
        source.expect_fetch().times(2).returning(move || {
            let expiry = expiries.remove(0);
            Ok(payload(expiry))
        });

        let provider = CredentialProvider::new(Arc::new(source));
        let first = provider.ensure_credentials().await.unwrap();
        let second = provider.ensure_credentials().await.unwrap();

        assert_eq!(first.expires_at_ms, near);
        assert_eq!(second.expires_at_ms, far);
    }

    #[tokio::test]
    async fn test_incomplete_payload_is_configuration_error() {
        let mut source = MockCredentialSource::new();
        source.expect_fetch().times(1).returning(|| {
            Ok(CredentialPayload {
                access_key_id: "AKID".to_string(),
                secret_access_key: String::new(),
                session_token: "token".to_string(),
                identity_id: None,
                expiration: None,
            })
        });

        let provider = CredentialProvider::new(Arc::new(source));
        let result = provider.ensure_credentials().await;
        assert!(matches!(result, Err(DomainError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_endpoint_failure_propagates_as_credential_fetch() {
        let mut source = MockCredentialSource::new();
        source
            .expect_fetch()
            .times(1)
            .returning(|| Err(DomainError::CredentialFetch("connection refused".to_string())));

        let provider = CredentialProvider::new(Arc::new(source));
        let result = provider.ensure_credentials().await;
        assert!(matches!(result, Err(DomainError::CredentialFetch(_))));
    }
}
