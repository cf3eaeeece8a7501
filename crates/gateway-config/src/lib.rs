//! TOML-backed configuration for the credential-pool executor and session
//! memory subsystems, with environment variable overrides for the core
//! tunables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_base_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

fn default_max_age_days() -> i64 {
    0
}

fn default_keyword_boost() -> f32 {
    0.25
}

fn default_recency_boost() -> f32 {
    0.15
}

fn default_export_max_bytes() -> u64 {
    262_144_000
}

fn default_threshold_percent() -> f32 {
    0.75
}

fn default_max_summary_tokens() -> usize {
    2000
}

fn default_summarization_timeout_secs() -> u64 {
    30
}

fn default_history_capacity() -> usize {
    500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub base_dir: PathBuf,
    pub anchor_append_only: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            anchor_append_only: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SemanticConfig {
    pub enabled: bool,
    pub model: String,
    pub base_url: String,
    pub max_age_days: i64,
    pub keyword_boost: f32,
    pub recency_boost: f32,
    pub rerank: bool,
    pub export_max_bytes: u64,
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: String::new(),
            base_url: String::new(),
            max_age_days: default_max_age_days(),
            keyword_boost: default_keyword_boost(),
            recency_boost: default_recency_boost(),
            rerank: true,
            export_max_bytes: default_export_max_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    pub enabled: bool,
    pub threshold_percent: f32,
    pub max_summary_tokens: usize,
    pub fallback_to_regex: bool,
    pub summarization_timeout_secs: u64,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_percent: default_threshold_percent(),
            max_summary_tokens: default_max_summary_tokens(),
            fallback_to_regex: true,
            summarization_timeout_secs: default_summarization_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub memory: MemoryConfig,
    pub semantic: SemanticConfig,
    pub summarizer: SummarizerConfig,
    pub history: HistoryConfig,
}

impl AppConfig {
    /// Loads from `path`, falling back to defaults if the file is missing or
    /// unreadable, then applies environment variable overrides.
    pub fn load_from(path: &std::path::Path) -> Self {
        let mut cfg = std::fs::read_to_string(path)
            .ok()
            .and_then(|raw| toml::from_str(&raw).ok())
            .unwrap_or_default();
        Self::apply_env_overrides(&mut cfg);
        cfg
    }

    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, raw)?;
        Ok(())
    }

    fn apply_env_overrides(cfg: &mut AppConfig) {
        if let Ok(v) = std::env::var("GATEWAY_MEMORY_DIR") {
            cfg.memory.base_dir = PathBuf::from(v);
        }
        if let Some(v) = env_bool("GATEWAY_ANCHOR_APPEND_ONLY") {
            cfg.memory.anchor_append_only = v;
        }
        if let Some(v) = env_bool("GATEWAY_SEMANTIC_ENABLED") {
            cfg.semantic.enabled = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SEMANTIC_MODEL") {
            cfg.semantic.model = v;
        }
        if let Ok(v) = std::env::var("GATEWAY_SEMANTIC_BASE_URL") {
            cfg.semantic.base_url = v;
        }
        if let Some(v) = env_parse::<i64>("GATEWAY_SEMANTIC_MAX_AGE_DAYS") {
            cfg.semantic.max_age_days = v;
        }
        if let Some(v) = env_parse::<f32>("GATEWAY_SEMANTIC_KEYWORD_BOOST") {
            cfg.semantic.keyword_boost = v;
        }
        if let Some(v) = env_parse::<f32>("GATEWAY_SEMANTIC_RECENCY_BOOST") {
            cfg.semantic.recency_boost = v;
        }
        if let Some(v) = env_bool("GATEWAY_SEMANTIC_RERANK") {
            cfg.semantic.rerank = v;
        }
        if let Some(v) = env_parse::<u64>("GATEWAY_MEMORY_EXPORT_MAX_BYTES") {
            cfg.semantic.export_max_bytes = v;
        }
    }
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|v| match v.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
