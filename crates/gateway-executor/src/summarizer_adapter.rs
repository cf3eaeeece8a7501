//! Adapter implementing the summarizer's narrow `CredentialInvoker` seam
//! (§9 "LLM executor dependency inversion") on top of the real C8 executor,
//! so the summarizer's provider-preference list becomes a C8 dispatch.

use async_trait::async_trait;
use gateway_error::GatewayError;
use gateway_summarizer::executor::CredentialInvoker;

use crate::driver::ProviderDriver;
use crate::executor::CredentialExecutor;

#[async_trait]
impl<D: ProviderDriver> CredentialInvoker for CredentialExecutor<D> {
    async fn invoke_nonstream(
        &self,
        providers: &[String],
        payload: &serde_json::Value,
        headers: &[(String, String)],
    ) -> Result<Vec<u8>, GatewayError> {
        let model = payload.get("model").and_then(|v| v.as_str()).unwrap_or("").to_string();
        if providers.is_empty() {
            return Err(GatewayError::NoEligibleCredential { provider: String::new(), model });
        }

        let mut last_err = None;
        for provider in providers {
            match self.invoke(provider, &model, payload.clone(), headers.to_vec()).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(GatewayError::NoEligibleCredential { provider: providers[0].clone(), model }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use gateway_auth::{Auth, AuthRegistry};

    use super::*;
    use crate::echo::EchoProviderDriver;
    use crate::executor::ExecutorConfig;

    #[tokio::test]
    async fn falls_through_provider_list_until_one_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(AuthRegistry::new(dir.path()));
        registry.save(Auth::new("a1", "anthropic")).unwrap();
        let driver = Arc::new(EchoProviderDriver::new());
        driver.push_nonstream(Ok((b"summary text".to_vec(), Default::default())));
        let executor = CredentialExecutor::new(registry, driver, ExecutorConfig::default());

        let payload = serde_json::json!({ "model": "claude-3" });
        let providers = vec!["openai".to_string(), "anthropic".to_string()];
        let out = executor.invoke_nonstream(&providers, &payload, &[]).await.unwrap();
        assert_eq!(out, b"summary text");
    }

    #[tokio::test]
    async fn empty_provider_list_returns_no_eligible_credential() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(AuthRegistry::new(dir.path()));
        let driver = Arc::new(EchoProviderDriver::new());
        let executor = CredentialExecutor::new(registry, driver, ExecutorConfig::default());

        let payload = serde_json::json!({ "model": "claude-3" });
        let err = executor.invoke_nonstream(&[], &payload, &[]).await.unwrap_err();
        assert!(matches!(err, GatewayError::NoEligibleCredential { .. }));
    }
}
