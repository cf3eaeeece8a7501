//! C6 Summarizer: builds structured summaries from dropped events via an
//! LLM executor, with a deterministic regex fallback and a token-budget
//! clamp on every write.

pub mod executor;
pub mod fallback;
pub mod probe;
pub mod prompt;

use chrono::{DateTime, Utc};
use gateway_error::GatewayError;
use gateway_memory::summary::DroppedEvent;
use serde::{Deserialize, Serialize};

pub use executor::{ModelFallbackExecutor, NoopSummarizerExecutor, SummarizerExecutor};

const MAX_FILE_MODIFICATIONS: usize = 12;
const MAX_DECISIONS: usize = 5;
const MAX_NEXT_STEPS: usize = 5;
const MAX_TECHNICAL_DETAILS_CHARS: usize = 1500;
const FIELD_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub threshold_percent: f32,
    pub max_summary_tokens: usize,
    pub fallback_to_regex: bool,
    pub summarization_timeout: std::time::Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: 0.75,
            max_summary_tokens: 2000,
            fallback_to_regex: true,
            summarization_timeout: std::time::Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SummaryMetadata {
    pub updated_at: Option<DateTime<Utc>>,
    pub compression_count: u32,
    pub tokens_used: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StructuredSummary {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub session_intent: String,
    #[serde(default)]
    pub file_modifications: Vec<String>,
    #[serde(default)]
    pub decisions_made: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
    #[serde(default)]
    pub technical_details: String,
    #[serde(default)]
    pub metadata: SummaryMetadata,
}

fn default_version() -> u32 {
    1
}

impl StructuredSummary {
    /// Applies every per-field length/count cap in §3. Called on every write.
    pub fn clamp(&mut self) {
        self.version = self.version.max(1);
        clamp_str(&mut self.session_intent, FIELD_MAX_CHARS);
        clamp_list(&mut self.file_modifications, MAX_FILE_MODIFICATIONS, FIELD_MAX_CHARS);
        clamp_list(&mut self.decisions_made, MAX_DECISIONS, FIELD_MAX_CHARS);
        clamp_list(&mut self.next_steps, MAX_NEXT_STEPS, FIELD_MAX_CHARS);
        clamp_str(&mut self.technical_details, MAX_TECHNICAL_DETAILS_CHARS);
    }

    fn bump_metadata(&mut self, response_len_chars: usize) {
        self.metadata.updated_at = Some(Utc::now());
        self.metadata.compression_count += 1;
        self.metadata.tokens_used = (response_len_chars / 4) as u32;
    }
}

fn clamp_str(s: &mut String, max_chars: usize) {
    if s.chars().count() > max_chars {
        *s = s.chars().take(max_chars).collect();
    }
}

fn clamp_list(list: &mut Vec<String>, max_len: usize, max_chars: usize) {
    list.truncate(max_len);
    for item in list.iter_mut() {
        clamp_str(item, max_chars);
    }
}

/// Builds the first summary from dropped events via `executor`, falling back
/// to the regex heuristic on timeout, executor error, or parse failure.
pub async fn generate_initial_summary(
    executor: &dyn SummarizerExecutor,
    model: &str,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
    config: &SummarizerConfig,
) -> StructuredSummary {
    let prompt = prompt::build_initial_prompt(dropped, latest_intent);
    run_with_fallback(executor, model, &prompt, None, dropped, latest_intent, config).await
}

/// Merges `existing` with newly dropped events via `executor`, falling back
/// to the regex heuristic on failure (carrying `existing` forward).
pub async fn merge_summary(
    executor: &dyn SummarizerExecutor,
    model: &str,
    existing: &StructuredSummary,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
    config: &SummarizerConfig,
) -> StructuredSummary {
    let prompt = prompt::build_merge_prompt(existing, dropped, latest_intent);
    run_with_fallback(executor, model, &prompt, Some(existing), dropped, latest_intent, config).await
}

async fn run_with_fallback(
    executor: &dyn SummarizerExecutor,
    model: &str,
    prompt: &str,
    existing: Option<&StructuredSummary>,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
    config: &SummarizerConfig,
) -> StructuredSummary {
    let call = executor.summarize(model, prompt);
    let outcome = tokio::time::timeout(config.summarization_timeout, call).await;

    let parsed = match outcome {
        Ok(Ok(response)) => parse_response(&response),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "summarizer executor error, considering regex fallback");
            None
        }
        Err(_) => {
            tracing::warn!("summarizer call timed out, considering regex fallback");
            None
        }
    };

    match parsed {
        Some(mut summary) => {
            summary.clamp();
            summary
        }
        None if config.fallback_to_regex => {
            let mut summary = fallback::regex_fallback(existing, dropped, latest_intent);
            summary.clamp();
            summary
        }
        None => existing.cloned().unwrap_or_default(),
    }
}

fn parse_response(response: &str) -> Option<StructuredSummary> {
    let json_slice = extract_first_balanced_braces(response)?;
    let mut summary: StructuredSummary = serde_json::from_str(json_slice).ok()?;
    summary.bump_metadata(response.len());
    Some(summary)
}

/// Scans for the first balanced `{...}` block, honoring string literals so
/// braces inside quoted strings don't throw off the depth count.
fn extract_first_balanced_braces(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
