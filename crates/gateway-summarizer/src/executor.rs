//! The summarizer depends on an executor seam (§9 "LLM executor dependency
//! inversion") rather than a concrete provider client, so it can be unit
//! tested without a live network call.

use async_trait::async_trait;
use gateway_error::GatewayError;
use serde_json::json;
use std::sync::Mutex;

use crate::probe::extract_assistant_text;

const MODEL_NOT_FOUND_PATTERNS: &[&str] = &[
    "model not found",
    "unknown model",
    "unsupported model",
    "invalid model",
    "does not exist",
];

/// One method: summarize a deterministic prompt under the caller's model
/// choice, returning raw assistant text (already extracted from provider
/// framing).
#[async_trait]
pub trait SummarizerExecutor: Send + Sync {
    async fn summarize(&self, model: &str, prompt: &str) -> Result<String, GatewayError>;
}

/// Test double that returns a fixed canned response (or error) regardless of
/// input.
pub struct NoopSummarizerExecutor {
    response: Mutex<Result<String, String>>,
}

impl NoopSummarizerExecutor {
    pub fn with_response(response: String) -> Self {
        Self { response: Mutex::new(Ok(response)) }
    }

    pub fn with_error(message: String) -> Self {
        Self { response: Mutex::new(Err(message)) }
    }
}

#[async_trait]
impl SummarizerExecutor for NoopSummarizerExecutor {
    async fn summarize(&self, _model: &str, _prompt: &str) -> Result<String, GatewayError> {
        match &*self.response.lock().unwrap() {
            Ok(s) => Ok(s.clone()),
            Err(e) => Err(GatewayError::Transient(e.clone())),
        }
    }
}

/// The narrow slice of the credential executor (C8) the summarizer needs:
/// a single non-streaming dispatch by provider preference list.
#[async_trait]
pub trait CredentialInvoker: Send + Sync {
    async fn invoke_nonstream(
        &self,
        providers: &[String],
        payload: &serde_json::Value,
        headers: &[(String, String)],
    ) -> Result<Vec<u8>, GatewayError>;
}

/// Default (C6a) summarizer executor: builds an OpenAI-compatible chat
/// payload and dispatches it through a credential invoker (normally C8),
/// extracting assistant text via the provider-agnostic probe.
pub struct PipelineSummarizerExecutor<I: CredentialInvoker> {
    invoker: I,
    providers: Vec<String>,
}

impl<I: CredentialInvoker> PipelineSummarizerExecutor<I> {
    pub fn new(invoker: I, providers: Vec<String>) -> Self {
        Self { invoker, providers }
    }
}

#[async_trait]
impl<I: CredentialInvoker> SummarizerExecutor for PipelineSummarizerExecutor<I> {
    async fn summarize(&self, model: &str, prompt: &str) -> Result<String, GatewayError> {
        let payload = json!({
            "model": model,
            "messages": [
                {"role": "system", "content": "You compress dropped conversation context into structured JSON."},
                {"role": "user", "content": prompt},
            ],
            "max_tokens": 2000,
            "temperature": 0.3,
        });
        let headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-CLIProxyAPI-Internal".to_string(), "summarization".to_string()),
        ];
        let bytes = self.invoker.invoke_nonstream(&self.providers, &payload, &headers).await?;
        Ok(extract_assistant_text(&bytes))
    }
}

/// Retries once against `default_model` when the inner executor's error
/// matches a "model not found"-shaped substring.
pub struct ModelFallbackExecutor<E: SummarizerExecutor> {
    inner: E,
    default_model: String,
}

impl<E: SummarizerExecutor> ModelFallbackExecutor<E> {
    pub fn new(inner: E, default_model: String) -> Self {
        Self { inner, default_model }
    }
}

#[async_trait]
impl<E: SummarizerExecutor> SummarizerExecutor for ModelFallbackExecutor<E> {
    async fn summarize(&self, model: &str, prompt: &str) -> Result<String, GatewayError> {
        match self.inner.summarize(model, prompt).await {
            Ok(s) => Ok(s),
            Err(e) if is_model_not_found(&e) && model != self.default_model => {
                tracing::warn!(model, fallback_model = %self.default_model, "retrying summarization with default model");
                self.inner.summarize(&self.default_model, prompt).await
            }
            Err(e) => Err(e),
        }
    }
}

fn is_model_not_found(err: &GatewayError) -> bool {
    let message = err.to_string().to_lowercase();
    MODEL_NOT_FOUND_PATTERNS.iter().any(|p| message.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_executor_returns_canned_response() {
        let executor = NoopSummarizerExecutor::with_response("canned".into());
        let result = executor.summarize("gpt", "prompt").await.unwrap();
        assert_eq!(result, "canned");
    }

    struct FlakyInvoker;

    #[async_trait]
    impl CredentialInvoker for FlakyInvoker {
        async fn invoke_nonstream(
            &self,
            _providers: &[String],
            _payload: &serde_json::Value,
            _headers: &[(String, String)],
        ) -> Result<Vec<u8>, GatewayError> {
            Ok(br#"{"choices":[{"message":{"content":"hi"}}]}"#.to_vec())
        }
    }

    #[tokio::test]
    async fn pipeline_executor_extracts_assistant_text() {
        let executor = PipelineSummarizerExecutor::new(FlakyInvoker, vec!["openai".into()]);
        let result = executor.summarize("gpt-4o", "prompt").await.unwrap();
        assert_eq!(result, "hi");
    }

    struct ModelNotFoundThenOk;

    #[async_trait]
    impl SummarizerExecutor for ModelNotFoundThenOk {
        async fn summarize(&self, model: &str, _prompt: &str) -> Result<String, GatewayError> {
            if model == "missing-model" {
                Err(GatewayError::Permanent("unknown model: missing-model".into()))
            } else {
                Ok(format!("ok with {model}"))
            }
        }
    }

    #[tokio::test]
    async fn model_fallback_retries_with_default() {
        let executor = ModelFallbackExecutor::new(ModelNotFoundThenOk, "gpt-default".into());
        let result = executor.summarize("missing-model", "prompt").await.unwrap();
        assert_eq!(result, "ok with gpt-default");
    }
}
