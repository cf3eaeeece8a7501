//! Session memory subsystem: append-only event log (C2), semantic vector
//! store (C3), anchored summary store (C4), and prune/export (C5).
//!
//! All text that reaches disk through this crate passes through
//! `gateway_redact::redact` first.

pub mod event_log;
pub mod export;
pub mod prune;
pub mod semantic;
pub mod summary;
pub mod tokenize;

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

pub use gateway_error::GatewayError;

/// Sanitizes a raw session key to `[A-Za-z0-9._-]`, replacing other bytes
/// with `_`, truncated to 120 characters.
pub fn sanitize_session_key(key: &str) -> String {
    let mut out: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(120);
    out
}

pub fn sessions_root(base: &Path) -> PathBuf {
    base.join("sessions")
}

pub fn session_dir(base: &Path, session: &str) -> PathBuf {
    sessions_root(base).join(sanitize_session_key(session))
}

pub fn semantic_root(base: &Path) -> PathBuf {
    base.join("semantic")
}

/// First 16 hex chars of SHA-256(namespace) — the on-disk namespace key.
pub fn namespace_key(namespace: &str) -> String {
    let digest = Sha256::digest(namespace.as_bytes());
    let hex = hex_encode(&digest);
    hex[..16].to_string()
}

pub fn semantic_dir(base: &Path, namespace: &str) -> PathBuf {
    semantic_root(base).join(namespace_key(namespace))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

pub(crate) fn short_hash(text: &str) -> [u8; 8] {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Reads at most the last `max_bytes` of `path`. If the tail doesn't start at
/// byte 0, the first (partial) line is discarded. Nonexistent files return
/// an empty vec, not an error.
pub(crate) fn read_tail_lines(path: &Path, max_bytes: u64) -> std::io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_bytes);
    let truncated = start > 0;
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.split('\n').collect();
    if truncated && !lines.is_empty() {
        lines.remove(0);
    }
    Ok(lines
        .into_iter()
        .map(|l| l.trim_end_matches('\r').to_string())
        .filter(|l| !l.is_empty())
        .collect())
}

pub(crate) fn now_unix_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Atomically overwrites `path` with `contents` via a sibling temp file,
/// fsync, then rename.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{file_name}.tmp"));
    {
        let mut f = std::fs::File::create(&tmp_path)?;
        use std::io::Write;
        f.write_all(contents)?;
        f.flush()?;
        f.sync_all()?;
    }
    let result = std::fs::rename(&tmp_path, path);
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_session_key() {
        assert_eq!(sanitize_session_key("abc/def 123"), "abc_def_123");
        let long = "a".repeat(200);
        assert_eq!(sanitize_session_key(&long).len(), 120);
    }

    #[test]
    fn namespace_key_is_16_hex_chars() {
        let k = namespace_key("my-namespace");
        assert_eq!(k.len(), 16);
        assert!(k.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn read_tail_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.jsonl");
        assert!(read_tail_lines(&path, 2 * 1024 * 1024).unwrap().is_empty());
    }
}
