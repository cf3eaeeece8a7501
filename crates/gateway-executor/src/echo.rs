//! `EchoProviderDriver`: a scriptable test double so C8 can be exercised
//! without a live provider.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use gateway_auth::Auth;

use crate::driver::{DriverError, DriverErrorKind, DriverRequest, ProviderDriver, StreamChunk, StreamResult, TokenUsage};

#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    NonStream(Result<(Vec<u8>, TokenUsage), DriverError>),
    Stream(Result<StreamResult, DriverError>),
}

/// Replays a queued script of outcomes, one per call, regardless of which
/// `Auth` is passed in (tests enqueue per-credential behavior in call order).
pub struct EchoProviderDriver {
    script: Mutex<VecDeque<ScriptedOutcome>>,
}

impl EchoProviderDriver {
    pub fn new() -> Self {
        Self { script: Mutex::new(VecDeque::new()) }
    }

    pub fn push_nonstream(&self, outcome: Result<(Vec<u8>, TokenUsage), DriverError>) {
        self.script.lock().unwrap().push_back(ScriptedOutcome::NonStream(outcome));
    }

    pub fn push_stream(&self, outcome: Result<StreamResult, DriverError>) {
        self.script.lock().unwrap().push_back(ScriptedOutcome::Stream(outcome));
    }

    pub fn push_stream_chunks(&self, chunks: Vec<&str>, usage: TokenUsage) {
        let result = StreamResult {
            chunks: chunks.into_iter().map(|c| StreamChunk::new(c.as_bytes().to_vec())).collect(),
            usage,
        };
        self.push_stream(Ok(result));
    }

    /// Like `push_stream_chunks`, but each chunk carries an explicit
    /// upstream-silence duration so keep-alive behavior can be exercised.
    pub fn push_stream_chunks_with_silence(&self, chunks: Vec<(&str, std::time::Duration)>, usage: TokenUsage) {
        let result = StreamResult {
            chunks: chunks.into_iter().map(|(c, silence)| StreamChunk::after_silence(c.as_bytes().to_vec(), silence)).collect(),
            usage,
        };
        self.push_stream(Ok(result));
    }

    pub fn push_pre_byte_error(&self, kind: DriverErrorKind, message: &str) {
        self.push_stream(Err(DriverError { kind, message: message.to_string(), pre_byte: true, account_wide: false }));
    }

    pub fn push_account_wide_quota_error(&self, message: &str) {
        self.push_stream(Err(DriverError {
            kind: DriverErrorKind::QuotaExceeded,
            message: message.to_string(),
            pre_byte: true,
            account_wide: true,
        }));
    }
}

impl Default for EchoProviderDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderDriver for EchoProviderDriver {
    async fn invoke(&self, _auth: &Auth, _request: &DriverRequest) -> Result<(Vec<u8>, TokenUsage), DriverError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedOutcome::NonStream(outcome)) => outcome,
            Some(ScriptedOutcome::Stream(_)) => {
                Err(DriverError { kind: DriverErrorKind::Permanent, message: "scripted outcome mismatch: expected non-stream".into(), pre_byte: true, account_wide: false })
            }
            None => Ok((b"{}".to_vec(), TokenUsage::default())),
        }
    }

    async fn invoke_stream(&self, _auth: &Auth, _request: &DriverRequest) -> Result<StreamResult, DriverError> {
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedOutcome::Stream(outcome)) => outcome,
            Some(ScriptedOutcome::NonStream(_)) => {
                Err(DriverError { kind: DriverErrorKind::Permanent, message: "scripted outcome mismatch: expected stream".into(), pre_byte: true, account_wide: false })
            }
            None => Ok(StreamResult::default()),
        }
    }

    async fn refresh(&self, _auth: &Auth) -> Result<serde_json::Value, DriverError> {
        Ok(serde_json::json!({}))
    }
}
