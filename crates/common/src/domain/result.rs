use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Credential endpoint error: {0}")]
    CredentialFetch(String),

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Rate limited by upstream after {attempts} attempts")]
    RateLimited { attempts: usize },

    #[error("Session expired")]
    SessionExpired,

    #[error("Path not allowed: {0}")]
    ForbiddenPath(String),

    #[error("Upstream returned status {status}")]
    Upstream { status: u16, body: String },

    #[error("Telemetry parse error: {0}")]
    Parse(String),

    #[error("Vehicle not found: {0}")]
    VehicleNotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl DomainError {
    /// Whether the caller may retry through a recovery path (backoff or
    /// failover) rather than surfacing the error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DomainError::CredentialFetch(_)
                | DomainError::Transport(_)
                | DomainError::RateLimited { .. }
        )
    }
}
