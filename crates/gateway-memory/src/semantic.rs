//! C3 Semantic Store: append-only `(text, vector, norm, metadata)` records
//! per namespace, with cosine top-k and optional keyword/recency rerank.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use gateway_error::GatewayError;
use serde::{Deserialize, Serialize};

use crate::{now_unix_millis, read_tail_lines, semantic_dir};

const TAIL_BYTES: u64 = 2 * 1024 * 1024;
const DEFAULT_KEYWORD_BOOST: f32 = 0.25;
const DEFAULT_RECENCY_BOOST: f32 = 0.15;
const DEFAULT_RECENCY_WINDOW_DAYS: i64 = 30;
const DEFAULT_SEARCH_MAX_CHARS: usize = 3000;
const DEFAULT_SEARCH_MAX_SNIPPETS: usize = 4;
const SNIPPET_TRUNCATE_CHARS: usize = 1200;
const DAY_MILLIS: i64 = 86_400_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticRecord {
    #[serde(default)]
    pub ts: i64,
    #[serde(default)]
    pub role: String,
    pub text: String,
    #[serde(rename = "vec", default)]
    pub vector: Vec<f32>,
    #[serde(default)]
    pub norm: f32,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub repo: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub rerank: bool,
    pub keyword_boost: f32,
    pub recency_boost: bool,
    pub recency_boost_factor: f32,
    pub recency_window_days: i64,
    pub max_age_days: i64,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            rerank: true,
            keyword_boost: DEFAULT_KEYWORD_BOOST,
            recency_boost: true,
            recency_boost_factor: DEFAULT_RECENCY_BOOST,
            recency_window_days: DEFAULT_RECENCY_WINDOW_DAYS,
            max_age_days: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queued: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

impl QueueStats {
    pub fn inc_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.queued.load(Ordering::Relaxed),
            self.dropped.load(Ordering::Relaxed),
            self.processed.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NamespaceInfo {
    pub key: String,
    pub namespace: String,
    pub updated_at: i64,
    pub size_bytes: u64,
    pub items_bytes: u64,
}

fn items_path(base: &Path, namespace: &str) -> PathBuf {
    semantic_dir(base, namespace).join("items.jsonl")
}

fn namespace_label_path(base: &Path, namespace: &str) -> PathBuf {
    semantic_dir(base, namespace).join("namespace.txt")
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Appends `records` to `namespace`, redacting+trimming text, computing
/// missing norms, and suppressing zero-norm and within-batch duplicate text.
pub fn append_semantic(
    base: &Path,
    namespace: &str,
    records: &mut Vec<SemanticRecord>,
) -> Result<(), GatewayError> {
    if namespace.is_empty() {
        return Err(GatewayError::BadInput("empty namespace".into()));
    }
    let dir = semantic_dir(base, namespace);
    std::fs::create_dir_all(&dir).map_err(|e| GatewayError::Internal(format!("create namespace dir: {e}")))?;

    let label_path = namespace_label_path(base, namespace);
    if !label_path.exists() {
        std::fs::write(&label_path, namespace)
            .map_err(|e| GatewayError::Internal(format!("write namespace label: {e}")))?;
    }

    let mut seen_text = std::collections::HashSet::new();
    let mut lines = String::new();
    for record in records.iter_mut() {
        record.text = gateway_redact::redact(record.text.trim());
        if record.text.is_empty() || record.vector.is_empty() {
            continue;
        }
        if record.norm == 0.0 {
            record.norm = l2_norm(&record.vector);
        }
        if record.norm == 0.0 {
            continue;
        }
        if !seen_text.insert(record.text.clone()) {
            continue;
        }
        if record.ts == 0 {
            record.ts = now_unix_millis();
        }
        let line = serde_json::to_string(record)
            .map_err(|e| GatewayError::Internal(format!("serialize semantic record: {e}")))?;
        lines.push_str(&line);
        lines.push('\n');
    }

    use std::fs::OpenOptions;
    use std::io::Write;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(items_path(base, namespace))
        .map_err(|e| GatewayError::Internal(format!("open items file: {e}")))?;
    file.write_all(lines.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("write items: {e}")))?;
    Ok(())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let dot: f32 = a[..n].iter().zip(&b[..n]).map(|(x, y)| x * y).sum();
    let na = l2_norm(&a[..n]);
    let nb = l2_norm(&b[..n]);
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Cosine top-k search by vector only.
pub fn search_semantic(
    base: &Path,
    namespace: &str,
    query_vec: &[f32],
    max_chars: Option<usize>,
    max_snippets: Option<usize>,
) -> Result<Vec<String>, GatewayError> {
    search_semantic_with_text(base, namespace, query_vec, None, max_chars, max_snippets, SearchOptions::default())
}

/// Cosine top-k search with optional keyword-overlap and recency rerank.
pub fn search_semantic_with_text(
    base: &Path,
    namespace: &str,
    query_vec: &[f32],
    query_text: Option<&str>,
    max_chars: Option<usize>,
    max_snippets: Option<usize>,
    options: SearchOptions,
) -> Result<Vec<String>, GatewayError> {
    let max_chars = max_chars.unwrap_or(DEFAULT_SEARCH_MAX_CHARS);
    let max_snippets = max_snippets.unwrap_or(DEFAULT_SEARCH_MAX_SNIPPETS);
    let path = items_path(base, namespace);
    let lines = read_tail_lines(&path, TAIL_BYTES)
        .map_err(|e| GatewayError::Internal(format!("read items tail: {e}")))?;

    let query_tokens = query_text.map(crate::tokenize::tokenize).unwrap_or_default();
    let recency_window_millis =
        DAY_MILLIS * if options.max_age_days > 0 { options.max_age_days } else { options.recency_window_days };
    let now = now_unix_millis();

    let mut scored: Vec<(f32, String)> = Vec::new();
    for line in &lines {
        let Ok(rec) = serde_json::from_str::<SemanticRecord>(line) else {
            continue;
        };
        if rec.vector.is_empty() || rec.norm <= 0.0 {
            continue;
        }
        if options.max_age_days > 0 {
            let age_days = (now - rec.ts) / DAY_MILLIS;
            if age_days > options.max_age_days {
                continue;
            }
        }

        let mut score = cosine_similarity(query_vec, &rec.vector);
        if score <= 0.0 {
            continue;
        }

        if options.rerank && !query_tokens.is_empty() {
            let lowered = rec.text.to_lowercase();
            let k = crate::tokenize::count_contained(&query_tokens, &lowered);
            score *= 1.0 + options.keyword_boost * (k as f32 / query_tokens.len() as f32);
        }

        if options.recency_boost && recency_window_millis > 0 {
            let age_millis = (now - rec.ts).max(0);
            let decay = (1.0 - age_millis as f32 / recency_window_millis as f32).clamp(0.0, 1.0);
            score *= 1.0 + options.recency_boost_factor * decay;
        }

        scored.push((score, rec.text));
    }

    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = std::collections::HashSet::new();
    let mut snippets = Vec::new();
    let mut cumulative = 0usize;
    for (_, text) in scored {
        if !seen.insert(text.clone()) {
            continue;
        }
        let snippet = truncate_with_marker(&text, SNIPPET_TRUNCATE_CHARS);
        if cumulative + snippet.len() > max_chars || snippets.len() >= max_snippets {
            break;
        }
        cumulative += snippet.len();
        snippets.push(snippet);
    }
    Ok(snippets)
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}... [truncated]")
}

/// Lists semantic namespaces under `base`, sorted by `updated_at` desc.
pub fn list_semantic_namespaces(base: &Path, limit: usize) -> Result<Vec<NamespaceInfo>, GatewayError> {
    let root = crate::semantic_root(base);
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut infos = Vec::new();
    let entries = std::fs::read_dir(&root).map_err(|e| GatewayError::Internal(format!("read semantic dir: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
        if !entry.path().is_dir() {
            continue;
        }
        let key = entry.file_name().to_string_lossy().into_owned();
        let label_path = entry.path().join("namespace.txt");
        let label = std::fs::read_to_string(&label_path).unwrap_or_default();
        let items = entry.path().join("items.jsonl");
        let (updated_at, items_bytes) = match std::fs::metadata(&items) {
            Ok(meta) => {
                let mtime = meta
                    .modified()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                (mtime, meta.len())
            }
            Err(_) => (0, 0),
        };
        let size_bytes = dir_size(&entry.path()).unwrap_or(0);
        infos.push(NamespaceInfo { key, namespace: label, updated_at, size_bytes, items_bytes });
    }
    infos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    infos.truncate(if limit == 0 { infos.len() } else { limit });
    Ok(infos)
}

fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_search_ranks_closest_vector_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = vec![
            SemanticRecord { ts: 0, role: "user".into(), text: "apple".into(), vector: vec![1.0, 0.0, 0.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
            SemanticRecord { ts: 0, role: "user".into(), text: "car".into(), vector: vec![0.0, 1.0, 0.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
        ];
        append_semantic(dir.path(), "n", &mut records).unwrap();
        let results = search_semantic(dir.path(), "n", &[0.99, 0.14, 0.0], Some(6000), Some(10)).unwrap();
        assert_eq!(results.first().map(String::as_str), Some("apple"));
    }

    #[test]
    fn skips_empty_text_and_empty_vec() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = vec![
            SemanticRecord { ts: 0, role: String::new(), text: "".into(), vector: vec![1.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
            SemanticRecord { ts: 0, role: String::new(), text: "no vector".into(), vector: vec![], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
        ];
        append_semantic(dir.path(), "n", &mut records).unwrap();
        let raw = std::fs::read_to_string(items_path(dir.path(), "n")).unwrap_or_default();
        assert!(raw.is_empty());
    }

    #[test]
    fn suppresses_duplicate_text_within_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut records = vec![
            SemanticRecord { ts: 0, role: String::new(), text: "dup".into(), vector: vec![1.0, 0.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
            SemanticRecord { ts: 0, role: String::new(), text: "dup".into(), vector: vec![1.0, 0.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() },
        ];
        append_semantic(dir.path(), "n", &mut records).unwrap();
        let raw = std::fs::read_to_string(items_path(dir.path(), "n")).unwrap();
        assert_eq!(raw.lines().count(), 1);
    }

    #[test]
    fn cosine_similarity_is_in_range() {
        let s = cosine_similarity(&[1.0, 2.0, 3.0], &[-1.0, -2.0, -3.0]);
        assert!((-1.0..=1.0).contains(&s));
        assert!((s - -1.0).abs() < 1e-5);
    }

    #[test]
    fn list_namespaces_sorted_by_updated_at_desc() {
        let dir = tempfile::tempdir().unwrap();
        let mut r1 = vec![SemanticRecord { ts: 0, role: String::new(), text: "a".into(), vector: vec![1.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() }];
        append_semantic(dir.path(), "first", &mut r1).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let mut r2 = vec![SemanticRecord { ts: 0, role: String::new(), text: "b".into(), vector: vec![1.0], norm: 0.0, source: String::new(), session: String::new(), repo: String::new() }];
        append_semantic(dir.path(), "second", &mut r2).unwrap();
        let infos = list_semantic_namespaces(dir.path(), 10).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].namespace, "second");
    }

    #[test]
    fn queue_stats_increment_independently() {
        let stats = QueueStats::default();
        stats.inc_queued();
        stats.inc_queued();
        stats.inc_dropped();
        let (queued, dropped, processed, failed) = stats.snapshot();
        assert_eq!(queued, 2);
        assert_eq!(dropped, 1);
        assert_eq!(processed, 0);
        assert_eq!(failed, 0);
    }
}
