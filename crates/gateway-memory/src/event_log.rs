//! C2 Event Log: append-only JSONL of conversation events per session.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use gateway_error::GatewayError;
use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::{atomic_write, now_unix_millis, read_tail_lines, session_dir, summary};

const TAIL_BYTES: u64 = 2 * 1024 * 1024;
const SEARCH_CACHE_CAPACITY: usize = 64;
const SEARCH_CACHE_TTL: Duration = Duration::from_secs(20);
const DEFAULT_TAIL_LIMIT: usize = 50;
const MAX_TAIL_LIMIT: usize = 500;
const DEFAULT_SEARCH_MAX_CHARS: usize = 6000;
const DEFAULT_SEARCH_MAX_SNIPPETS: usize = 8;
const SNIPPET_TRUNCATE_CHARS: usize = 1200;
const ANCHOR_SNIPPET_TRUNCATE_CHARS: usize = 2000;
const TRUNCATION_MARKER: &str = "... [truncated]";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "ts", default)]
    pub ts: i64,
    pub kind: String,
    #[serde(default)]
    pub role: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

/// Append-only per-session event log with a memoized search index.
pub struct EventLog {
    base: PathBuf,
    search_cache: Mutex<LruCache<String, (Instant, Vec<String>)>>,
}

impl EventLog {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            search_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEARCH_CACHE_CAPACITY).unwrap(),
            )),
        }
    }

    fn events_path(&self, session: &str) -> PathBuf {
        session_dir(&self.base, session).join("events.jsonl")
    }

    /// Appends `events` to `session`, creating the session directory if
    /// absent. Assigns wall-clock `ts` to events with `ts == 0`, nondecreasing
    /// within this batch. Redacts `text`. Empty session or empty events is a
    /// no-op success.
    pub fn append(&self, session: &str, events: &mut [Event]) -> Result<(), GatewayError> {
        if self.base.as_os_str().is_empty() {
            return Err(GatewayError::NotConfigured("memory base dir unset".into()));
        }
        if session.is_empty() || events.is_empty() {
            return Ok(());
        }
        let dir = session_dir(&self.base, session);
        std::fs::create_dir_all(&dir)
            .map_err(|e| GatewayError::Internal(format!("create session dir: {e}")))?;

        let mut last_ts = now_unix_millis();
        let mut buf = String::with_capacity(64 * 1024);
        for event in events.iter_mut() {
            if event.ts == 0 {
                event.ts = last_ts;
            }
            last_ts = last_ts.max(event.ts);
            event.text = gateway_redact::redact(&event.text);
            let line = serde_json::to_string(event)
                .map_err(|e| GatewayError::Internal(format!("serialize event: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        use fs2::FileExt;
        use std::fs::OpenOptions;
        use std::io::Write;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path(session))
            .map_err(|e| GatewayError::Internal(format!("open events file: {e}")))?;
        // Per-session advisory lock: append serialization across processes.
        file.lock_exclusive().map_err(|e| GatewayError::Internal(format!("lock events file: {e}")))?;
        let mut writer = std::io::BufWriter::with_capacity(64 * 1024, file);
        writer
            .write_all(buf.as_bytes())
            .map_err(|e| GatewayError::Internal(format!("write events: {e}")))?;
        writer
            .flush()
            .map_err(|e| GatewayError::Internal(format!("flush events: {e}")))?;
        FileExt::unlock(writer.get_ref()).map_err(|e| GatewayError::Internal(format!("unlock events file: {e}")))?;

        self.invalidate_session(session);
        Ok(())
    }

    /// Reads the last `limit` events (clamped to `[1, 500]`, default 50) from
    /// the tail of the session's event file, in chronological order.
    /// Nonexistent file returns empty, not error.
    pub fn read_event_tail(&self, session: &str, limit: usize) -> Result<Vec<Event>, GatewayError> {
        let limit = limit.clamp(1, MAX_TAIL_LIMIT);
        let limit = if limit == 0 { DEFAULT_TAIL_LIMIT } else { limit };
        let path = self.events_path(session);
        let lines = read_tail_lines(&path, TAIL_BYTES)
            .map_err(|e| GatewayError::Internal(format!("read events tail: {e}")))?;

        let mut out = Vec::new();
        for line in lines.iter().rev() {
            match serde_json::from_str::<Event>(line) {
                Ok(ev) if !ev.text.is_empty() => {
                    out.push(ev);
                    if out.len() >= limit {
                        break;
                    }
                }
                _ => continue,
            }
        }
        out.reverse();
        Ok(out)
    }

    /// Tokenized lexical search over the session's event tail, memoized for
    /// 20s per distinct `(session, query, max_chars, max_snippets)` key.
    pub fn search(
        &self,
        session: &str,
        query: &str,
        max_chars: Option<usize>,
        max_snippets: Option<usize>,
    ) -> Result<Vec<String>, GatewayError> {
        let max_chars = max_chars.unwrap_or(DEFAULT_SEARCH_MAX_CHARS);
        let max_snippets = max_snippets.unwrap_or(DEFAULT_SEARCH_MAX_SNIPPETS);
        let cache_key = format!("session|{session}|{query}|{max_chars}|{max_snippets}");

        if let Some((stamp, cached)) = self.search_cache.lock().unwrap().get(&cache_key) {
            if stamp.elapsed() < SEARCH_CACHE_TTL {
                return Ok(cached.clone());
            }
        }

        let result = self.search_uncached(session, query, max_chars, max_snippets)?;
        self.search_cache
            .lock()
            .unwrap()
            .put(cache_key, (Instant::now(), result.clone()));
        Ok(result)
    }

    fn search_uncached(
        &self,
        session: &str,
        query: &str,
        max_chars: usize,
        max_snippets: usize,
    ) -> Result<Vec<String>, GatewayError> {
        let tokens = crate::tokenize::tokenize(query);
        let path = self.events_path(session);
        let lines = read_tail_lines(&path, TAIL_BYTES)
            .map_err(|e| GatewayError::Internal(format!("read events tail: {e}")))?;

        if tokens.is_empty() {
            return Ok(self.prepend_anchor(session, Vec::new(), max_chars, max_snippets));
        }

        let mut scored: Vec<(f64, String)> = Vec::new();
        for (idx, line) in lines.iter().enumerate() {
            let Ok(ev) = serde_json::from_str::<Event>(line) else {
                continue;
            };
            if ev.text.is_empty() {
                continue;
            }
            let lowered = ev.text.to_lowercase();
            let hits = crate::tokenize::count_contained(&tokens, &lowered);
            let recency_bonus = idx as f64 / 200.0;
            let score = 3.0 * hits as f64 + recency_bonus;
            if score > 0.0 {
                scored.push((score, ev.text));
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut seen_hashes = std::collections::HashSet::new();
        let mut snippets = Vec::new();
        let mut cumulative = 0usize;
        for (_, text) in scored {
            let hash = crate::short_hash(&text);
            if !seen_hashes.insert(hash) {
                continue;
            }
            let snippet = truncate_with_marker(&text, SNIPPET_TRUNCATE_CHARS);
            if cumulative + snippet.len() > max_chars || snippets.len() >= max_snippets {
                break;
            }
            cumulative += snippet.len();
            snippets.push(snippet);
        }

        Ok(self.prepend_anchor(session, snippets, max_chars, max_snippets))
    }

    fn prepend_anchor(
        &self,
        session: &str,
        mut snippets: Vec<String>,
        max_chars: usize,
        max_snippets: usize,
    ) -> Vec<String> {
        if let Ok(Some(anchor)) = summary::read_summary(&self.base, session, None) {
            if !anchor.is_empty() {
                let anchor_snippet = truncate_with_marker(&anchor, ANCHOR_SNIPPET_TRUNCATE_CHARS);
                snippets.insert(0, anchor_snippet);
            }
        }
        let mut cumulative = 0usize;
        let mut out = Vec::new();
        for s in snippets {
            if cumulative + s.len() > max_chars || out.len() >= max_snippets {
                break;
            }
            cumulative += s.len();
            out.push(s);
        }
        out
    }

    /// Invalidates memoized search results for `session` (called on Append
    /// and WriteSummary for that session).
    pub fn invalidate_session(&self, session: &str) {
        let prefix = format!("session|{session}|");
        let mut cache = self.search_cache.lock().unwrap();
        let stale: Vec<String> = cache
            .iter()
            .filter(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in stale {
            cache.pop(&key);
        }
    }
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_log() -> (tempfile::TempDir, EventLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        (dir, log)
    }

    #[test]
    fn append_and_read_tail_preserves_order() {
        let (_dir, log) = new_log();
        let mut events = vec![
            Event {
                ts: 0,
                kind: "message".into(),
                role: "user".into(),
                type_: String::new(),
                text: "Hello".into(),
                meta: Default::default(),
            },
            Event {
                ts: 0,
                kind: "message".into(),
                role: "assistant".into(),
                type_: String::new(),
                text: "Hi".into(),
                meta: Default::default(),
            },
        ];
        log.append("s1", &mut events).unwrap();
        let tail = log.read_event_tail("s1", 10).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "Hello");
        assert_eq!(tail[1].text, "Hi");
        assert!(tail[0].ts > 0);
        assert!(tail[1].ts >= tail[0].ts);
    }

    #[test]
    fn empty_session_or_events_is_noop() {
        let (_dir, log) = new_log();
        assert!(log.append("", &mut []).is_ok());
        assert!(log.append("s1", &mut []).is_ok());
        assert!(log.read_event_tail("s1", 10).unwrap().is_empty());
    }

    #[test]
    fn nonexistent_session_returns_empty_not_error() {
        let (_dir, log) = new_log();
        assert!(log.read_event_tail("does-not-exist", 10).unwrap().is_empty());
    }

    #[test]
    fn redacts_secrets_before_persisting() {
        let (_dir, log) = new_log();
        let mut events = vec![Event {
            ts: 0,
            kind: "message".into(),
            role: "user".into(),
            type_: String::new(),
            text: "my key is sk-ABCDEFGHIJKL".into(),
            meta: Default::default(),
        }];
        log.append("s1", &mut events).unwrap();
        let tail = log.read_event_tail("s1", 1).unwrap();
        assert!(tail[0].text.contains("[REDACTED]"));
        assert!(!tail[0].text.contains("sk-ABCDEFGHIJKL"));
    }

    #[test]
    fn search_scores_and_orders_by_token_hits() {
        let (_dir, log) = new_log();
        let mut events = vec![
            Event {
                ts: 0,
                kind: "message".into(),
                role: "user".into(),
                type_: String::new(),
                text: "database migration failed".into(),
                meta: Default::default(),
            },
            Event {
                ts: 0,
                kind: "message".into(),
                role: "assistant".into(),
                type_: String::new(),
                text: "unrelated weather chat".into(),
                meta: Default::default(),
            },
        ];
        log.append("s1", &mut events).unwrap();
        let results = log.search("s1", "database migration", None, None).unwrap();
        assert!(results.iter().any(|r| r.contains("database migration failed")));
    }

    #[test]
    fn empty_query_returns_empty_result() {
        let (_dir, log) = new_log();
        let mut events = vec![Event {
            ts: 0,
            kind: "message".into(),
            role: "user".into(),
            type_: String::new(),
            text: "hello".into(),
            meta: Default::default(),
        }];
        log.append("s1", &mut events).unwrap();
        let results = log.search("s1", "", None, None).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn corrupt_line_is_skipped() {
        let (_dir, log) = new_log();
        let path = log.events_path("s1");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "not json\n{\"kind\":\"message\",\"role\":\"user\",\"text\":\"ok\",\"ts\":1}\n").unwrap();
        let tail = log.read_event_tail("s1", 10).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].text, "ok");
    }
}
