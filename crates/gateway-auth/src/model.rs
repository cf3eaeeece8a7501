//! The `Auth` entity (§3) and its nested state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Active,
    Paused,
    Error,
}

impl Default for ModelStatus {
    fn default() -> Self {
        ModelStatus::Active
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Quota {
    pub exceeded: bool,
    pub reason: String,
    pub backoff_level: u32,
    pub next_recover_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelState {
    pub unavailable: bool,
    pub next_retry_after: Option<DateTime<Utc>>,
    pub quota: Quota,
    pub status: ModelStatus,
    pub last_error: String,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_requests: u64,
    pub daily_input_tokens: u64,
    pub daily_output_tokens: u64,
    pub daily_requests: u64,
    pub daily_reset_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auth {
    pub id: String,
    pub provider: String,
    pub label: String,
    pub file_name: String,
    pub priority: i32,
    pub disabled: bool,
    pub unavailable: bool,
    pub next_retry_after: Option<DateTime<Utc>>,
    /// Provider-specific secret bundle, opaque to the executor.
    pub storage: serde_json::Value,
    pub quota: Quota,
    pub model_states: HashMap<String, ModelState>,
    pub usage: Usage,
    pub status_message: String,
    pub last_error: String,
    pub updated_at: DateTime<Utc>,
    pub metadata: HashMap<String, String>,
}

impl Auth {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            provider: provider.into().to_lowercase(),
            label: String::new(),
            file_name: String::new(),
            priority: 0,
            disabled: false,
            unavailable: false,
            next_retry_after: None,
            storage: serde_json::Value::Null,
            quota: Quota::default(),
            model_states: HashMap::new(),
            usage: Usage::default(),
            status_message: String::new(),
            last_error: String::new(),
            updated_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn model_state(&self, model: &str) -> Option<&ModelState> {
        self.model_states.get(model)
    }

    pub fn model_state_mut(&mut self, model: &str) -> &mut ModelState {
        self.model_states.entry(model.to_string()).or_default()
    }

    /// Whether this Auth is eligible for selection against `provider`/`model`
    /// at `now`, ignoring the runtime pause registry (checked separately).
    pub fn is_eligible(&self, provider: &str, model: &str, now: DateTime<Utc>) -> bool {
        if self.provider != provider || self.disabled || self.unavailable {
            return false;
        }
        if let Some(retry) = self.next_retry_after {
            if retry > now {
                return false;
            }
        }
        if let Some(state) = self.model_states.get(model) {
            if state.unavailable {
                if let Some(retry) = state.next_retry_after {
                    if retry > now {
                        return false;
                    }
                } else {
                    return false;
                }
            }
        }
        true
    }
}
