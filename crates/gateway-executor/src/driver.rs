//! The provider driver interface (§6): one implementation per upstream,
//! dispatched by tag rather than dynamic string lookup at the hot path.

use std::time::Duration;

use async_trait::async_trait;
use gateway_auth::Auth;
use gateway_error::GatewayError;

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct DriverRequest {
    pub model: String,
    pub payload: serde_json::Value,
    pub headers: Vec<(String, String)>,
}

/// An error from a provider driver. `pre_byte` records whether any response
/// byte had already been forwarded to the client when this occurred — C8
/// only bootstrap-retries when it is `true`. `account_wide` records whether
/// the provider reported the quota failure at the account level rather than
/// just for the requested model — C8 only mirrors the failure into the
/// Auth-level `Quota` when this is set.
#[derive(Debug, Clone)]
pub struct DriverError {
    pub kind: DriverErrorKind,
    pub message: String,
    pub pre_byte: bool,
    pub account_wide: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    Transient,
    QuotaExceeded,
    AuthExpired,
    Permanent,
}

impl DriverError {
    pub fn to_gateway_error(&self) -> GatewayError {
        match self.kind {
            DriverErrorKind::Transient => GatewayError::Transient(self.message.clone()),
            DriverErrorKind::QuotaExceeded => GatewayError::QuotaExceeded(self.message.clone()),
            DriverErrorKind::AuthExpired => GatewayError::AuthExpired(self.message.clone()),
            DriverErrorKind::Permanent => GatewayError::Permanent(self.message.clone()),
        }
    }
}

/// One piece of an upstream stream. `silence_before` is how long the
/// upstream went quiet immediately before this chunk arrived — C8 uses it
/// to decide whether a keep-alive heartbeat belongs ahead of the chunk.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub bytes: Vec<u8>,
    pub silence_before: Duration,
}

impl StreamChunk {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, silence_before: Duration::ZERO }
    }

    pub fn after_silence(bytes: Vec<u8>, silence_before: Duration) -> Self {
        Self { bytes, silence_before }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamResult {
    pub chunks: Vec<StreamChunk>,
    pub usage: TokenUsage,
}

/// One provider driver per upstream. Owns wire-format translation and
/// provider-specific retry semantics below the byte-emission boundary.
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    async fn invoke(&self, auth: &Auth, request: &DriverRequest) -> Result<(Vec<u8>, TokenUsage), DriverError>;
    async fn invoke_stream(&self, auth: &Auth, request: &DriverRequest) -> Result<StreamResult, DriverError>;
    async fn refresh(&self, auth: &Auth) -> Result<serde_json::Value, DriverError>;
}
