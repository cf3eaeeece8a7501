//! C5 Prune: age/count/byte-bounded garbage collection over sessions (C2–C4)
//! and semantic namespaces (C3).

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use gateway_error::GatewayError;

use crate::{semantic_root, sessions_root};

const DAY_SECS: i64 = 86_400;

#[derive(Debug, Clone, Default)]
pub struct PruneResult {
    pub sessions_removed: usize,
    pub bytes_freed: u64,
}

fn newest_mtime_secs(dir: &Path) -> std::io::Result<i64> {
    let mut newest = 0i64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if let Ok(modified) = meta.modified() {
            if let Ok(secs) = modified.duration_since(UNIX_EPOCH) {
                newest = newest.max(secs.as_secs() as i64);
            }
        }
    }
    Ok(newest)
}

fn dir_total_bytes(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0u64;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Removes sessions older than `max_age_days` (if `>0`), then trims the
/// oldest surplus if more than `max_sessions` remain (if `>0`), then rewrites
/// any oversized `events.jsonl` as a byte-tail aligned to the next `\n`.
pub fn prune_sessions(
    base: &Path,
    max_age_days: i64,
    max_sessions: usize,
    max_bytes_per_session: u64,
) -> Result<PruneResult, GatewayError> {
    let root = sessions_root(base);
    if !root.exists() {
        return Ok(PruneResult::default());
    }

    let mut sessions: Vec<(std::path::PathBuf, i64, u64)> = Vec::new();
    for entry in std::fs::read_dir(&root).map_err(|e| GatewayError::Internal(format!("read sessions dir: {e}")))? {
        let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
        if !entry.path().is_dir() {
            continue;
        }
        let mtime = newest_mtime_secs(&entry.path()).unwrap_or(0);
        let size = dir_total_bytes(&entry.path()).unwrap_or(0);
        sessions.push((entry.path(), mtime, size));
    }

    let mut result = PruneResult::default();
    let now = now_secs();

    if max_age_days > 0 {
        let cutoff = now - max_age_days * DAY_SECS;
        let mut kept = Vec::new();
        for (path, mtime, size) in sessions.into_iter() {
            if mtime < cutoff {
                let _ = std::fs::remove_dir_all(&path);
                result.sessions_removed += 1;
                result.bytes_freed += size;
            } else {
                kept.push((path, mtime, size));
            }
        }
        sessions = kept;
    }

    if max_sessions > 0 && sessions.len() > max_sessions {
        sessions.sort_by_key(|(_, mtime, _)| *mtime);
        let surplus = sessions.len() - max_sessions;
        for (path, _, size) in sessions.drain(0..surplus) {
            let _ = std::fs::remove_dir_all(&path);
            result.sessions_removed += 1;
            result.bytes_freed += size;
        }
    }

    if max_bytes_per_session > 0 {
        for (path, _, _) in &sessions {
            let events_path = path.join("events.jsonl");
            if let Ok(meta) = std::fs::metadata(&events_path) {
                if meta.len() > max_bytes_per_session {
                    let freed = trim_to_tail(&events_path, max_bytes_per_session)
                        .map_err(|e| GatewayError::Internal(format!("trim events file: {e}")))?;
                    result.bytes_freed += freed;
                }
            }
        }
    }

    Ok(result)
}

/// Analogous pruning over `<base>/semantic/<ns>/items.jsonl`.
pub fn prune_semantic(base: &Path, max_bytes_per_namespace: u64) -> Result<u64, GatewayError> {
    let root = semantic_root(base);
    if !root.exists() || max_bytes_per_namespace == 0 {
        return Ok(0);
    }
    let mut bytes_freed = 0u64;
    for entry in std::fs::read_dir(&root).map_err(|e| GatewayError::Internal(format!("read semantic dir: {e}")))? {
        let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
        if !entry.path().is_dir() {
            continue;
        }
        let items_path = entry.path().join("items.jsonl");
        if let Ok(meta) = std::fs::metadata(&items_path) {
            if meta.len() > max_bytes_per_namespace {
                bytes_freed += trim_to_tail(&items_path, max_bytes_per_namespace)
                    .map_err(|e| GatewayError::Internal(format!("trim items file: {e}")))?;
            }
        }
    }
    Ok(bytes_freed)
}

fn trim_to_tail(path: &Path, max_bytes: u64) -> std::io::Result<u64> {
    let pre_size = std::fs::metadata(path)?.len();
    let tail_lines = crate::read_tail_lines(path, max_bytes)?;
    let mut content = tail_lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    crate::atomic_write(path, content.as_bytes())?;
    let post_size = std::fs::metadata(path)?.len();
    Ok(pre_size.saturating_sub(post_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn prunes_surplus_sessions_by_age() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("sessions");
        touch(&root.join("a"), "events.jsonl", "{}\n");
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(&root.join("b"), "events.jsonl", "{}\n");
        std::thread::sleep(std::time::Duration::from_millis(20));
        touch(&root.join("c"), "events.jsonl", "{}\n");

        let result = prune_sessions(base.path(), 0, 2, 0).unwrap();
        assert_eq!(result.sessions_removed, 1);
        assert!(!root.join("a").exists());
        assert!(root.join("b").exists());
        assert!(root.join("c").exists());
    }

    #[test]
    fn trims_oversized_events_file() {
        let base = tempfile::tempdir().unwrap();
        let root = base.path().join("sessions");
        let session_dir = root.join("s1");
        fs::create_dir_all(&session_dir).unwrap();
        let mut content = String::new();
        for i in 0..1000 {
            content.push_str(&format!("{{\"i\":{i}}}\n"));
        }
        fs::write(session_dir.join("events.jsonl"), &content).unwrap();

        let result = prune_sessions(base.path(), 0, 0, 100).unwrap();
        assert!(result.bytes_freed > 0);
        let post = fs::metadata(session_dir.join("events.jsonl")).unwrap().len();
        assert!(post <= content.len() as u64);
    }

    #[test]
    fn no_op_when_base_has_no_sessions_dir() {
        let base = tempfile::tempdir().unwrap();
        let result = prune_sessions(base.path(), 30, 10, 0).unwrap();
        assert_eq!(result.sessions_removed, 0);
        assert_eq!(result.bytes_freed, 0);
    }
}
