//! Error kinds shared across the credential executor and session memory
//! subsystems. Call sites that only need to propagate an error use
//! `anyhow::Result`; call sites that branch on *which* kind occurred (C8's
//! retry/backoff logic, the management layer's HTTP status mapping) match on
//! [`GatewayError`].

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("not configured: {0}")]
    NotConfigured(String),

    #[error("bad input: {0}")]
    BadInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no eligible credential for provider={provider} model={model}")]
    NoEligibleCredential { provider: String, model: String },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("auth expired: {0}")]
    AuthExpired(String),

    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Whether C8 should treat this as retryable within bootstrap budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Transient(_) | GatewayError::AuthExpired(_) | GatewayError::QuotaExceeded(_)
        )
    }
}
