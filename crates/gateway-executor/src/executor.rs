//! C8 Credential Executor: selects an `Auth` per request, dispatches to a
//! provider driver, observes outcomes, updates C7, bootstraps streaming
//! with retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_auth::{Auth, AuthRegistry, ModelStatus};
use gateway_error::GatewayError;
use rand::Rng;

use crate::driver::{DriverError, DriverErrorKind, DriverRequest, ProviderDriver, StreamChunk, StreamResult, TokenUsage};
use crate::selection::select_candidate;

const BACKOFF_BASE_SECS: i64 = 30;
const BACKOFF_CAP_SECS: i64 = 15 * 60;
const TRANSIENT_RETRY_SECS: i64 = 30;
const AUTH_EXPIRED_RETRY_SECS: i64 = 5 * 60;
const KEEP_ALIVE_COMMENT: &[u8] = b": keep-alive\n\n";

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub bootstrap_retries: u32,
    pub daily_reset_hour: u32,
    /// Seconds of upstream silence ahead of a chunk that triggers a
    /// keep-alive heartbeat before it. `0` disables heartbeats.
    pub keep_alive_seconds: u64,
    /// Largest number of bytes forwarded in a single chunk; larger chunks
    /// are split. `0` means unlimited.
    pub max_chunk_size: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { bootstrap_retries: 1, daily_reset_hour: 0, keep_alive_seconds: 0, max_chunk_size: 0 }
    }
}

/// Inserts keep-alive heartbeats ahead of chunks preceded by a silence gap
/// past the configured threshold, then splits any oversized chunk into
/// `max_chunk_size`-sized pieces. Runs once, after a stream finishes
/// successfully, over the whole buffered `StreamResult` (§4.8/§4.9 C8).
fn apply_stream_shaping(result: StreamResult, config: &ExecutorConfig) -> StreamResult {
    let keep_alive = if config.keep_alive_seconds > 0 { Some(Duration::from_secs(config.keep_alive_seconds)) } else { None };

    let mut chunks = Vec::with_capacity(result.chunks.len());
    for chunk in result.chunks {
        if let Some(threshold) = keep_alive {
            if chunk.silence_before >= threshold {
                chunks.push(StreamChunk::new(KEEP_ALIVE_COMMENT.to_vec()));
            }
        }
        if config.max_chunk_size > 0 && chunk.bytes.len() > config.max_chunk_size {
            let mut first = true;
            for piece in chunk.bytes.chunks(config.max_chunk_size) {
                if first {
                    chunks.push(StreamChunk::after_silence(piece.to_vec(), chunk.silence_before));
                    first = false;
                } else {
                    chunks.push(StreamChunk::new(piece.to_vec()));
                }
            }
        } else {
            chunks.push(chunk);
        }
    }
    StreamResult { chunks, usage: result.usage }
}

pub struct CredentialExecutor<D: ProviderDriver> {
    registry: Arc<AuthRegistry>,
    driver: Arc<D>,
    config: ExecutorConfig,
}

impl<D: ProviderDriver> CredentialExecutor<D> {
    pub fn new(registry: Arc<AuthRegistry>, driver: Arc<D>, config: ExecutorConfig) -> Self {
        Self { registry, driver, config }
    }

    fn pick(&self, provider: &str, model: &str, excluded: &[String]) -> Result<Auth, GatewayError> {
        let auths = self.registry.list();
        select_candidate(&auths, provider, model, &self.registry.runtime_pauses, excluded, Utc::now()).ok_or_else(
            || GatewayError::NoEligibleCredential { provider: provider.to_string(), model: model.to_string() },
        )
    }

    /// `stream = false` path: select once, invoke once, return bytes.
    pub async fn invoke(
        &self,
        provider: &str,
        model: &str,
        payload: serde_json::Value,
        headers: Vec<(String, String)>,
    ) -> Result<Vec<u8>, GatewayError> {
        let auth = self.pick(provider, model, &[])?;
        let request = DriverRequest { model: model.to_string(), payload, headers };
        match self.driver.invoke(&auth, &request).await {
            Ok((bytes, usage)) => {
                self.observe_success(&auth.id, model, &usage)?;
                Ok(bytes)
            }
            Err(e) => {
                self.observe_failure(&auth.id, model, &e).await?;
                Err(e.to_gateway_error())
            }
        }
    }

    /// `stream = true` path: bootstrap-retry across credentials until the
    /// first byte would be forwarded; after that, no further switching.
    pub async fn invoke_stream(
        &self,
        provider: &str,
        model: &str,
        payload: serde_json::Value,
        headers: Vec<(String, String)>,
    ) -> Result<StreamResult, GatewayError> {
        let mut budget = self.config.bootstrap_retries;
        let mut excluded = Vec::new();
        let mut last_error: Option<GatewayError> = None;

        loop {
            let auth = match self.pick(provider, model, &excluded) {
                Ok(a) => a,
                Err(e) => return Err(last_error.unwrap_or(e)),
            };
            excluded.push(auth.id.clone());
            let request = DriverRequest { model: model.to_string(), payload: payload.clone(), headers: headers.clone() };

            match self.driver.invoke_stream(&auth, &request).await {
                Ok(result) => {
                    self.observe_success(&auth.id, model, &result.usage)?;
                    return Ok(apply_stream_shaping(result, &self.config));
                }
                Err(e) => {
                    self.observe_failure(&auth.id, model, &e).await?;
                    if e.pre_byte && budget > 0 {
                        budget -= 1;
                        last_error = Some(e.to_gateway_error());
                        continue;
                    }
                    return Err(e.to_gateway_error());
                }
            }
        }
    }

    fn observe_success(&self, auth_id: &str, model: &str, usage: &TokenUsage) -> Result<(), GatewayError> {
        let reset_hour = self.config.daily_reset_hour;
        self.registry.update(auth_id, |auth| {
            {
                let state = auth.model_state_mut(model);
                state.quota.backoff_level = 0;
                state.last_error.clear();
                state.status = ModelStatus::Active;
                state.updated_at = Some(Utc::now());
            }
            auth.status_message.clear();
            auth.last_error.clear();
            accumulate_usage(auth, usage, reset_hour);
        })?;
        self.registry.runtime_pauses.clear(auth_id, model);
        tracing::info!(auth_id, model, "credential dispatch succeeded");
        Ok(())
    }

    async fn observe_failure(&self, auth_id: &str, model: &str, err: &DriverError) -> Result<(), GatewayError> {
        let registry = &self.registry;
        match err.kind {
            DriverErrorKind::QuotaExceeded => {
                let mut recover_at = Utc::now();
                let account_wide = err.account_wide;
                registry.update(auth_id, |auth| {
                    let backoff_level = {
                        let state = auth.model_state_mut(model);
                        state.quota.exceeded = true;
                        state.quota.reason = err.message.clone();
                        state.quota.backoff_level += 1;
                        state.quota.backoff_level
                    };
                    recover_at = compute_backoff_recover_at(backoff_level);
                    let state = auth.model_state_mut(model);
                    state.quota.next_recover_at = Some(recover_at);
                    state.status = ModelStatus::Paused;
                    state.last_error = err.message.clone();
                    state.updated_at = Some(Utc::now());
                    if account_wide {
                        auth.quota.exceeded = true;
                        auth.quota.reason = err.message.clone();
                        auth.quota.backoff_level = backoff_level;
                        auth.quota.next_recover_at = Some(recover_at);
                    }
                })?;
                registry.runtime_pauses.pause_until(auth_id, model, recover_at);
                if account_wide {
                    tracing::warn!(auth_id, model, reason = %err.message, "account-wide quota exceeded, entering cooldown");
                } else {
                    tracing::warn!(auth_id, model, reason = %err.message, "quota exceeded, entering cooldown");
                }
            }
            DriverErrorKind::AuthExpired => {
                let current = self.registry.get_by_id(auth_id);
                let refresh_ok = match current {
                    Some(auth) => self.driver.refresh(&auth).await.is_ok(),
                    None => false,
                };
                if !refresh_ok {
                    registry.update(auth_id, |auth| {
                        auth.unavailable = true;
                        auth.next_retry_after = Some(Utc::now() + ChronoDuration::seconds(AUTH_EXPIRED_RETRY_SECS));
                        auth.last_error = err.message.clone();
                    })?;
                }
                tracing::warn!(auth_id, model, "auth expired");
            }
            DriverErrorKind::Transient => {
                registry.update(auth_id, |auth| {
                    let state = auth.model_state_mut(model);
                    state.quota.backoff_level += 1;
                    state.next_retry_after = Some(Utc::now() + ChronoDuration::seconds(TRANSIENT_RETRY_SECS));
                    state.last_error = err.message.clone();
                    state.updated_at = Some(Utc::now());
                })?;
                tracing::warn!(auth_id, model, "transient network error");
            }
            DriverErrorKind::Permanent => {
                registry.update(auth_id, |auth| {
                    let state = auth.model_state_mut(model);
                    state.unavailable = true;
                    state.status = ModelStatus::Error;
                    state.last_error = err.message.clone();
                    state.updated_at = Some(Utc::now());
                })?;
                tracing::error!(auth_id, model, message = %err.message, "permanent provider error");
            }
        }
        Ok(())
    }
}

fn compute_backoff_recover_at(backoff_level: u32) -> DateTime<Utc> {
    let exp = 2u64.saturating_pow(backoff_level.min(20));
    let base_secs = (BACKOFF_BASE_SECS as u64).saturating_mul(exp).min(BACKOFF_CAP_SECS as u64);
    let jitter_secs = rand::thread_rng().gen_range(0..=5);
    Utc::now() + ChronoDuration::seconds(base_secs as i64 + jitter_secs)
}

fn accumulate_usage(auth: &mut Auth, usage: &TokenUsage, reset_hour: u32) {
    let now = Utc::now();
    let needs_reset = match auth.usage.daily_reset_at {
        None => true,
        Some(last) => {
            let today_reset = now.date_naive().and_hms_opt(reset_hour, 0, 0).unwrap();
            last.naive_utc() < today_reset && now.naive_utc() >= today_reset
        }
    };
    if needs_reset {
        auth.usage.daily_input_tokens = 0;
        auth.usage.daily_output_tokens = 0;
        auth.usage.daily_requests = 0;
        auth.usage.daily_reset_at = Some(now);
    }
    auth.usage.total_input_tokens += usage.input_tokens;
    auth.usage.total_output_tokens += usage.output_tokens;
    auth.usage.total_requests += 1;
    auth.usage.daily_input_tokens += usage.input_tokens;
    auth.usage.daily_output_tokens += usage.output_tokens;
    auth.usage.daily_requests += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::DriverErrorKind;
    use crate::echo::EchoProviderDriver;
    use gateway_auth::Auth;

    fn registry_with(auths: Vec<Auth>) -> Arc<AuthRegistry> {
        let dir = tempfile::tempdir().unwrap();
        let registry = AuthRegistry::new(dir.path());
        for auth in auths {
            registry.save(auth).unwrap();
        }
        Arc::new(registry)
    }

    #[tokio::test]
    async fn invoke_accumulates_token_usage() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_nonstream(Ok((b"hello".to_vec(), TokenUsage { input_tokens: 10, output_tokens: 20 })));
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        let out = executor.invoke("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        assert_eq!(out, b"hello");

        let auth = registry.get_by_id("a1").unwrap();
        assert_eq!(auth.usage.total_input_tokens, 10);
        assert_eq!(auth.usage.total_output_tokens, 20);
        assert_eq!(auth.usage.total_requests, 1);
        let state = auth.model_state("gpt-4").unwrap();
        assert_eq!(state.status, ModelStatus::Active);
    }

    #[tokio::test]
    async fn round_robin_across_equal_priority_credentials() {
        let mut a1 = Auth::new("a1", "openai");
        a1.updated_at = Utc::now() - ChronoDuration::seconds(10);
        let mut a2 = Auth::new("a2", "openai");
        a2.updated_at = Utc::now() - ChronoDuration::seconds(5);
        let registry = registry_with(vec![a1, a2]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_nonstream(Ok((b"one".to_vec(), TokenUsage::default())));
        driver.push_nonstream(Ok((b"two".to_vec(), TokenUsage::default())));
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        // a1 is least-recently-updated, so it's chosen first; once its
        // updated_at is bumped by observe_success, a2 becomes the least
        // recent and is chosen on the next call.
        executor.invoke("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        executor.invoke("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();

        let a1_after = registry.get_by_id("a1").unwrap();
        let a2_after = registry.get_by_id("a2").unwrap();
        assert_eq!(a1_after.usage.total_requests, 1);
        assert_eq!(a2_after.usage.total_requests, 1);
    }

    #[tokio::test]
    async fn bootstrap_retry_switches_credential_on_pre_byte_failure() {
        let mut a1 = Auth::new("a1", "openai");
        a1.updated_at = Utc::now() - ChronoDuration::seconds(10);
        let mut a2 = Auth::new("a2", "openai");
        a2.updated_at = Utc::now() - ChronoDuration::seconds(5);
        let registry = registry_with(vec![a1, a2]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_pre_byte_error(DriverErrorKind::QuotaExceeded, "rate limited");
        driver.push_stream_chunks(vec!["chunk-1", "chunk-2", "chunk-3"], TokenUsage { input_tokens: 3, output_tokens: 9 });
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        let result = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        assert_eq!(result.chunks.len(), 3);
        assert_eq!(result.usage.input_tokens, 3);

        let a1_after = registry.get_by_id("a1").unwrap();
        let state = a1_after.model_state("gpt-4").unwrap();
        assert!(state.quota.exceeded);
        assert!(state.quota.next_recover_at.unwrap() > Utc::now());
        assert_eq!(state.status, ModelStatus::Paused);
        assert!(registry.runtime_pauses.is_paused("a1", "gpt-4"));

        let a2_after = registry.get_by_id("a2").unwrap();
        assert_eq!(a2_after.usage.total_requests, 1);
    }

    #[tokio::test]
    async fn bootstrap_retry_budget_exhausted_returns_last_error() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_pre_byte_error(DriverErrorKind::Transient, "connection reset");
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig { bootstrap_retries: 1, ..ExecutorConfig::default() });

        let err = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoEligibleCredential { .. } | GatewayError::Transient(_)));
    }

    #[tokio::test]
    async fn non_pre_byte_failure_does_not_retry() {
        let registry = registry_with(vec![Auth::new("a1", "openai"), Auth::new("a2", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_stream(Err(DriverError { kind: DriverErrorKind::Permanent, message: "mid-stream failure".into(), pre_byte: false, account_wide: false }));
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        let err = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::Permanent(_)));
    }

    #[tokio::test]
    async fn keep_alive_heartbeat_inserted_after_silence_threshold() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_stream_chunks_with_silence(
            vec![
                ("chunk-1", std::time::Duration::from_secs(0)),
                ("chunk-2", std::time::Duration::from_secs(30)),
                ("chunk-3", std::time::Duration::from_secs(5)),
            ],
            TokenUsage::default(),
        );
        let config = ExecutorConfig { keep_alive_seconds: 15, ..ExecutorConfig::default() };
        let executor = CredentialExecutor::new(registry, driver, config);

        let result = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        let bodies: Vec<&[u8]> = result.chunks.iter().map(|c| c.bytes.as_slice()).collect();
        assert_eq!(bodies, vec![b"chunk-1".as_slice(), b": keep-alive\n\n".as_slice(), b"chunk-2".as_slice(), b"chunk-3".as_slice()]);
    }

    #[tokio::test]
    async fn keep_alive_disabled_by_default_inserts_nothing() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_stream_chunks_with_silence(vec![("chunk-1", std::time::Duration::from_secs(600))], TokenUsage::default());
        let executor = CredentialExecutor::new(registry, driver, ExecutorConfig::default());

        let result = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].bytes, b"chunk-1");
    }

    #[tokio::test]
    async fn oversized_chunk_is_split_to_max_chunk_size() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_stream_chunks(vec!["0123456789"], TokenUsage::default());
        let config = ExecutorConfig { max_chunk_size: 4, ..ExecutorConfig::default() };
        let executor = CredentialExecutor::new(registry, driver, config);

        let result = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();
        let bodies: Vec<&[u8]> = result.chunks.iter().map(|c| c.bytes.as_slice()).collect();
        assert_eq!(bodies, vec![b"0123".as_slice(), b"4567".as_slice(), b"89".as_slice()]);
    }

    #[tokio::test]
    async fn account_wide_quota_error_mirrors_into_auth_level_quota() {
        let registry = registry_with(vec![Auth::new("a1", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_account_wide_quota_error("account suspended");
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        let err = executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExceeded(_)));

        let auth = registry.get_by_id("a1").unwrap();
        assert!(auth.quota.exceeded);
        assert_eq!(auth.quota.reason, "account suspended");
        assert!(auth.quota.next_recover_at.unwrap() > Utc::now());

        let state = auth.model_state("gpt-4").unwrap();
        assert!(state.quota.exceeded);
    }

    #[tokio::test]
    async fn non_account_wide_quota_error_leaves_auth_level_quota_untouched() {
        let registry = registry_with(vec![Auth::new("a1", "openai"), Auth::new("a2", "openai")]);
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_pre_byte_error(DriverErrorKind::QuotaExceeded, "model rate limited");
        driver.push_stream_chunks(vec!["ok"], TokenUsage::default());
        let executor = CredentialExecutor::new(registry.clone(), driver, ExecutorConfig::default());

        executor.invoke_stream("openai", "gpt-4", serde_json::json!({}), vec![]).await.unwrap();

        let auth = registry.get_by_id("a1").unwrap();
        assert!(!auth.quota.exceeded);
        let state = auth.model_state("gpt-4").unwrap();
        assert!(state.quota.exceeded);
    }

    #[test]
    fn backoff_recover_at_grows_with_level_and_is_capped() {
        let low = compute_backoff_recover_at(0);
        let high = compute_backoff_recover_at(10);
        assert!(high - Utc::now() >= low - Utc::now());
        let capped = compute_backoff_recover_at(30);
        assert!(capped - Utc::now() <= ChronoDuration::seconds(BACKOFF_CAP_SECS + 6));
    }

    #[test]
    fn accumulate_usage_resets_daily_counters_across_boundary() {
        let mut auth = Auth::new("a1", "openai");
        auth.usage.daily_input_tokens = 500;
        auth.usage.daily_reset_at = Some(Utc::now() - ChronoDuration::days(1));
        accumulate_usage(&mut auth, &TokenUsage { input_tokens: 7, output_tokens: 3 }, 0);
        assert_eq!(auth.usage.daily_input_tokens, 7);
        assert_eq!(auth.usage.total_input_tokens, 7);
    }
}
