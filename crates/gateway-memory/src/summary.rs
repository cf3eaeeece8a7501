//! C4 Summary Store: anchored summary, anchor-pending signal, anchor
//! journal, and the pinned/todo scratchpads.

use std::path::Path;

use chrono::Utc;
use gateway_error::GatewayError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::{atomic_write, session_dir};

const DEFAULT_MAX_CHARS: usize = 20_000;
const TRUNCATION_MARKER: &str = "\n... [truncated]";
const MAX_FILE_PATHS: usize = 12;
const MAX_COMMAND_LINES: usize = 8;
const MAX_INTENT_CHARS: usize = 1200;

static FILE_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[/\\]?[\w./\\-]+\.(?:rs|go|py|js|ts|tsx|jsx|java|rb|c|h|cpp|hpp|toml|json|yaml|yml|md)")
        .expect("valid file path regex")
});

static COMMAND_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(go|git|node|npm|pnpm|yarn|python|python3|pip|pip3|deno|cargo)\b.*$")
        .expect("valid command line regex")
});

static ESCAPED_NEWLINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\[nrt]|\\u[0-9a-fA-F]{4}").expect("valid escape regex"));

static UNICODE_ESCAPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\u([0-9a-fA-F]{4})").expect("valid unicode escape regex"));

/// Controls the behavior of [`read_summary`]'s escape-normalization heuristic
/// (resolves the open question in the design notes: implementations should
/// make the double-escape decoding opt-out, since it can misfire on mixed
/// content).
#[derive(Debug, Clone, Copy)]
pub struct SummaryStoreOptions {
    pub normalize_escapes: bool,
}

impl Default for SummaryStoreOptions {
    fn default() -> Self {
        Self { normalize_escapes: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnchorEntry {
    ts: i64,
    summary: String,
}

fn summary_path(base: &Path, session: &str) -> std::path::PathBuf {
    session_dir(base, session).join("summary.md")
}

fn anchor_pending_path(base: &Path, session: &str) -> std::path::PathBuf {
    session_dir(base, session).join("anchor_pending.md")
}

fn anchors_journal_path(base: &Path, session: &str) -> std::path::PathBuf {
    session_dir(base, session).join("anchors.jsonl")
}

fn pinned_path(base: &Path, session: &str) -> std::path::PathBuf {
    session_dir(base, session).join("pinned.md")
}

fn todo_path(base: &Path, session: &str) -> std::path::PathBuf {
    session_dir(base, session).join("todo.md")
}

/// Overwrites `summary.md` for `session` via atomic write-temp + rename.
pub fn write_summary(base: &Path, session: &str, content: &str) -> Result<(), GatewayError> {
    if session.is_empty() {
        return Err(GatewayError::BadInput("empty session".into()));
    }
    let path = summary_path(base, session);
    atomic_write(&path, content.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("write summary: {e}")))
}

/// Reads `summary.md`, applying escape normalization and truncating to
/// `max_chars` (default 20000). Returns `Ok(None)` if no summary exists yet.
pub fn read_summary(
    base: &Path,
    session: &str,
    options: Option<SummaryStoreOptions>,
) -> Result<Option<String>, GatewayError> {
    let path = summary_path(base, session);
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| GatewayError::Internal(format!("read summary: {e}")))?;
    let opts = options.unwrap_or_default();
    let normalized = normalize_and_trim(&raw, opts);
    Ok(Some(truncate_with_marker(&normalized, DEFAULT_MAX_CHARS)))
}

fn normalize_and_trim(raw: &str, opts: SummaryStoreOptions) -> String {
    let trimmed = raw.trim_end();
    let mut text = trimmed.to_string();
    if opts.normalize_escapes && !text.contains('\n') && ESCAPED_NEWLINE_RE.is_match(&text) {
        text = text.replace("\\r\\n", "\n").replace("\\n", "\n").replace("\\r", "\n").replace("\\t", "\t");
        text = UNICODE_ESCAPE_RE
            .replace_all(&text, |caps: &regex::Captures| {
                let code = u32::from_str_radix(&caps[1], 16).unwrap_or(0);
                char::from_u32(code).map(|c| c.to_string()).unwrap_or_default()
            })
            .into_owned();
    }
    text.replace(['\u{201c}', '\u{201d}'], "\"").replace(['\u{2018}', '\u{2019}'], "'")
}

fn truncate_with_marker(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let truncated: String = text.chars().take(max_chars).collect();
    format!("{truncated}{TRUNCATION_MARKER}")
}

/// Writes `summary.md`, writes `anchor_pending.md` with the same content,
/// and appends `{ts, summary}` to `anchors.jsonl`.
pub fn set_anchor_summary(base: &Path, session: &str, summary: &str) -> Result<(), GatewayError> {
    write_summary(base, session, summary)?;
    let pending_path = anchor_pending_path(base, session);
    atomic_write(&pending_path, summary.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("write anchor pending: {e}")))?;

    let entry = AnchorEntry { ts: crate::now_unix_millis(), summary: summary.to_string() };
    let line = serde_json::to_string(&entry)
        .map_err(|e| GatewayError::Internal(format!("serialize anchor entry: {e}")))?;
    use std::fs::OpenOptions;
    use std::io::Write;
    let journal_path = anchors_journal_path(base, session);
    if let Some(parent) = journal_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| GatewayError::Internal(format!("create session dir: {e}")))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&journal_path)
        .map_err(|e| GatewayError::Internal(format!("open anchors journal: {e}")))?;
    writeln!(file, "{line}").map_err(|e| GatewayError::Internal(format!("append anchors journal: {e}")))?;
    Ok(())
}

pub fn read_pending_anchor(base: &Path, session: &str) -> Result<Option<String>, GatewayError> {
    let path = anchor_pending_path(base, session);
    if !path.exists() {
        return Ok(None);
    }
    std::fs::read_to_string(&path)
        .map(Some)
        .map_err(|e| GatewayError::Internal(format!("read anchor pending: {e}")))
}

pub fn clear_pending_anchor(base: &Path, session: &str) -> Result<(), GatewayError> {
    let path = anchor_pending_path(base, session);
    if path.exists() {
        std::fs::remove_file(&path)
            .map_err(|e| GatewayError::Internal(format!("remove anchor pending: {e}")))?;
    }
    Ok(())
}

pub fn write_pinned(base: &Path, session: &str, content: &str) -> Result<(), GatewayError> {
    atomic_write(&pinned_path(base, session), content.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("write pinned: {e}")))
}

pub fn write_todo(base: &Path, session: &str, content: &str) -> Result<(), GatewayError> {
    atomic_write(&todo_path(base, session), content.as_bytes())
        .map_err(|e| GatewayError::Internal(format!("write todo: {e}")))
}

/// A dropped event, as fed to [`build_anchored_summary`] by the summarizer
/// fallback path and by `upsert_anchored_summary` directly.
#[derive(Debug, Clone)]
pub struct DroppedEvent {
    pub role: String,
    pub text: String,
}

/// Writes pinned (if given) and computes+writes the next anchored summary
/// from the previous one plus newly dropped events.
pub fn upsert_anchored_summary(
    base: &Path,
    session: &str,
    dropped: &[DroppedEvent],
    pinned: Option<&str>,
    latest_intent: Option<&str>,
) -> Result<String, GatewayError> {
    if let Some(p) = pinned {
        write_pinned(base, session, p)?;
    }
    let prev = read_summary(base, session, None)?.unwrap_or_default();
    let next = build_anchored_summary(&prev, dropped, latest_intent);
    set_anchor_summary(base, session, &next)?;
    Ok(next)
}

/// Prepends the previous summary, appends an `## Updates` section with file
/// paths, command lines, and the latest user intent extracted from `dropped`.
pub fn build_anchored_summary(
    previous: &str,
    dropped: &[DroppedEvent],
    latest_intent: Option<&str>,
) -> String {
    let mut out = String::new();
    if !previous.is_empty() {
        out.push_str(previous);
        out.push_str("\n\n");
    }
    out.push_str("## Updates\n");
    out.push_str(&format!("Updated: {}\n\n", Utc::now().to_rfc3339()));

    let combined: String = dropped.iter().map(|d| d.text.as_str()).collect::<Vec<_>>().join("\n");

    let mut paths: Vec<String> = Vec::new();
    for m in FILE_PATH_RE.find_iter(&combined) {
        let p = m.as_str().to_string();
        if !paths.contains(&p) {
            paths.push(p);
            if paths.len() >= MAX_FILE_PATHS {
                break;
            }
        }
    }
    if !paths.is_empty() {
        out.push_str("Files touched:\n");
        for p in &paths {
            out.push_str(&format!("- {p}\n"));
        }
        out.push('\n');
    }

    let mut commands: Vec<String> = Vec::new();
    for m in COMMAND_LINE_RE.find_iter(&combined) {
        let c = m.as_str().trim().to_string();
        if !commands.contains(&c) {
            commands.push(c);
            if commands.len() >= MAX_COMMAND_LINES {
                break;
            }
        }
    }
    if !commands.is_empty() {
        out.push_str("Commands run:\n");
        for c in &commands {
            out.push_str(&format!("- {c}\n"));
        }
        out.push('\n');
    }

    let intent_source = dropped
        .iter()
        .rev()
        .find(|d| d.role == "user")
        .map(|d| d.text.as_str())
        .or(latest_intent)
        .unwrap_or("");
    let intent: String = intent_source.chars().take(MAX_INTENT_CHARS).collect();
    out.push_str("Latest user intent:\n```\n");
    out.push_str(&intent);
    out.push_str("\n```\n");

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_anchor_summary_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        set_anchor_summary(dir.path(), "s1", "hello world").unwrap();
        assert_eq!(read_summary(dir.path(), "s1", None).unwrap().unwrap(), "hello world");
        assert_eq!(read_pending_anchor(dir.path(), "s1").unwrap().unwrap(), "hello world");
        clear_pending_anchor(dir.path(), "s1").unwrap();
        assert!(read_pending_anchor(dir.path(), "s1").unwrap().is_none());
    }

    #[test]
    fn missing_summary_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_summary(dir.path(), "nope", None).unwrap().is_none());
    }

    #[test]
    fn normalizes_double_escaped_text() {
        let raw = r"line one\nline two";
        let out = normalize_and_trim(raw, SummaryStoreOptions::default());
        assert_eq!(out, "line one\nline two");
    }

    #[test]
    fn leaves_literal_newlines_alone() {
        let raw = "line one\\nline two\nactual newline";
        let out = normalize_and_trim(raw, SummaryStoreOptions::default());
        assert_eq!(out, raw.trim_end());
    }

    #[test]
    fn normalize_is_opt_out() {
        let raw = r"line one\nline two";
        let opts = SummaryStoreOptions { normalize_escapes: false };
        let out = normalize_and_trim(raw, opts);
        assert_eq!(out, raw);
    }

    #[test]
    fn replaces_smart_quotes() {
        let raw = "\u{201c}hello\u{201d}";
        let out = normalize_and_trim(raw, SummaryStoreOptions::default());
        assert_eq!(out, "\"hello\"");
    }

    #[test]
    fn build_anchored_summary_extracts_paths_and_intent() {
        let dropped = vec![
            DroppedEvent { role: "assistant".into(), text: "edited src/main.rs and ran cargo test".into() },
            DroppedEvent { role: "user".into(), text: "please add retry logic".into() },
        ];
        let out = build_anchored_summary("previous summary", &dropped, None);
        assert!(out.contains("previous summary"));
        assert!(out.contains("src/main.rs"));
        assert!(out.contains("cargo test"));
        assert!(out.contains("please add retry logic"));
    }
}
