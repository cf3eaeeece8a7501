//! C9 Request History: a bounded in-memory ring plus a persistent JSONL
//! tail on disk, one file per UTC day — same layout convention as
//! `gateway-memory`'s session event logs.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use gateway_error::GatewayError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub id: String,
    pub ts: DateTime<Utc>,
    pub provider: String,
    pub model: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

/// Fields a caller supplies; `id`/`ts` are assigned on append.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub provider: String,
    pub model: String,
    pub status_code: u16,
    pub duration_ms: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub status_min: Option<u16>,
    pub status_max: Option<u16>,
    pub errors_only: bool,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl HistoryFilter {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(start) = self.start_date {
            if entry.ts < start {
                return false;
            }
        }
        if let Some(end) = self.end_date {
            if entry.ts > end {
                return false;
            }
        }
        if let Some(model) = &self.model {
            if &entry.model != model {
                return false;
            }
        }
        if let Some(provider) = &self.provider {
            if &entry.provider != provider {
                return false;
            }
        }
        if let Some(min) = self.status_min {
            if entry.status_code < min {
                return false;
            }
        }
        if let Some(max) = self.status_max {
            if entry.status_code > max {
                return false;
            }
        }
        if self.errors_only && entry.error.is_none() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryStats {
    pub count: u64,
    pub error_count: u64,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
}

/// Round-tripped as a single JSON document by `export`/`import`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub entries: Vec<HistoryEntry>,
}

pub struct RequestHistory {
    dir: PathBuf,
    capacity: usize,
    ring: Mutex<VecDeque<HistoryEntry>>,
}

impl RequestHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_capacity(dir, DEFAULT_RING_CAPACITY)
    }

    pub fn with_capacity(dir: impl Into<PathBuf>, capacity: usize) -> Self {
        Self { dir: dir.into(), capacity, ring: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    fn day_files_in_range(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Vec<PathBuf>, GatewayError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|e| GatewayError::Internal(format!("read history dir: {e}")))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s,
                None => continue,
            };
            let date = match NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                Ok(d) => d,
                Err(_) => continue,
            };
            if let Some(start) = start {
                if date < start.date_naive() {
                    continue;
                }
            }
            if let Some(end) = end {
                if date > end.date_naive() {
                    continue;
                }
            }
            files.push(path);
        }
        files.sort();
        Ok(files)
    }

    /// Appends one entry to the in-memory ring (evicting the oldest entry
    /// past `capacity`) and to today's JSONL file.
    pub fn append(&self, new_entry: NewEntry) -> Result<HistoryEntry, GatewayError> {
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            provider: new_entry.provider,
            model: new_entry.model,
            status_code: new_entry.status_code,
            duration_ms: new_entry.duration_ms,
            input_tokens: new_entry.input_tokens,
            output_tokens: new_entry.output_tokens,
            error: new_entry.error,
        };

        fs::create_dir_all(&self.dir).map_err(|e| GatewayError::Internal(format!("create history dir: {e}")))?;
        let path = self.day_file(entry.ts.date_naive());
        let line = serde_json::to_string(&entry).map_err(|e| GatewayError::Internal(format!("serialize history entry: {e}")))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| GatewayError::Internal(format!("open history file: {e}")))?;
        writeln!(file, "{line}").map_err(|e| GatewayError::Internal(format!("write history file: {e}")))?;

        let mut ring = self.ring.lock().unwrap();
        ring.push_back(entry.clone());
        while ring.len() > self.capacity {
            ring.pop_front();
        }
        Ok(entry)
    }

    /// Reads and filters entries from disk across the filter's date range,
    /// most recent first, applying `offset`/`limit` last.
    pub fn get_entries(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, GatewayError> {
        let files = self.day_files_in_range(filter.start_date, filter.end_date)?;
        let mut matched = Vec::new();
        for path in files {
            for entry in read_day_file(&path)? {
                if filter.matches(&entry) {
                    matched.push(entry);
                }
            }
        }
        matched.sort_by(|a, b| b.ts.cmp(&a.ts));
        let matched = matched.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => matched.take(limit).collect(),
            None => matched.collect(),
        })
    }

    pub fn count(&self, filter: &HistoryFilter) -> Result<u64, GatewayError> {
        let unbounded = HistoryFilter { limit: None, offset: 0, ..filter.clone() };
        Ok(self.get_entries(&unbounded)?.len() as u64)
    }

    pub fn get_stats(&self, filter: &HistoryFilter) -> Result<HistoryStats, GatewayError> {
        let unbounded = HistoryFilter { limit: None, offset: 0, ..filter.clone() };
        let entries = self.get_entries(&unbounded)?;
        let mut stats = HistoryStats::default();
        for entry in &entries {
            stats.count += 1;
            if entry.error.is_some() {
                stats.error_count += 1;
            }
            stats.total_input_tokens += entry.input_tokens;
            stats.total_output_tokens += entry.output_tokens;
            stats.total_duration_ms += entry.duration_ms;
        }
        if stats.count > 0 {
            stats.avg_duration_ms = stats.total_duration_ms as f64 / stats.count as f64;
        }
        Ok(stats)
    }

    /// Deletes every on-disk day file and empties the in-memory ring.
    pub fn clear(&self) -> Result<(), GatewayError> {
        if self.dir.exists() {
            let entries = fs::read_dir(&self.dir).map_err(|e| GatewayError::Internal(format!("read history dir: {e}")))?;
            for entry in entries {
                let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                    fs::remove_file(&path).map_err(|e| GatewayError::Internal(format!("remove history file: {e}")))?;
                }
            }
        }
        self.ring.lock().unwrap().clear();
        Ok(())
    }

    /// Writes every matching entry to `dest` as a single JSON snapshot.
    pub fn export(&self, filter: &HistoryFilter, dest: &Path) -> Result<usize, GatewayError> {
        let entries = self.get_entries(filter)?;
        let snapshot = HistorySnapshot { entries };
        let raw = serde_json::to_vec_pretty(&snapshot).map_err(|e| GatewayError::Internal(format!("serialize snapshot: {e}")))?;
        fs::write(dest, raw).map_err(|e| GatewayError::Internal(format!("write snapshot: {e}")))?;
        Ok(snapshot.entries.len())
    }

    /// Reads a snapshot from `src` and appends entries not already present
    /// (by `id`). Returns `(added, skipped)`.
    pub fn import(&self, src: &Path) -> Result<(usize, usize), GatewayError> {
        let raw = fs::read_to_string(src).map_err(|e| GatewayError::Internal(format!("read snapshot: {e}")))?;
        let snapshot: HistorySnapshot = serde_json::from_str(&raw).map_err(|e| GatewayError::Internal(format!("parse snapshot: {e}")))?;

        let existing_ids: std::collections::HashSet<String> =
            self.get_entries(&HistoryFilter::default())?.into_iter().map(|e| e.id).collect();

        let mut added = 0usize;
        let mut skipped = 0usize;
        for entry in snapshot.entries {
            if existing_ids.contains(&entry.id) {
                skipped += 1;
                continue;
            }
            fs::create_dir_all(&self.dir).map_err(|e| GatewayError::Internal(format!("create history dir: {e}")))?;
            let path = self.day_file(entry.ts.date_naive());
            let line = serde_json::to_string(&entry).map_err(|e| GatewayError::Internal(format!("serialize history entry: {e}")))?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|e| GatewayError::Internal(format!("open history file: {e}")))?;
            writeln!(file, "{line}").map_err(|e| GatewayError::Internal(format!("write history file: {e}")))?;
            added += 1;
        }
        Ok((added, skipped))
    }

    /// Forces today's file to disk; `append` already writes and flushes
    /// synchronously, so this is a fsync barrier for callers that want an
    /// explicit durability point before, e.g., a process exit.
    pub fn save(&self) -> Result<(), GatewayError> {
        let path = self.day_file(Utc::now().date_naive());
        if path.exists() {
            let file = OpenOptions::new().append(true).open(&path).map_err(|e| GatewayError::Internal(format!("open history file: {e}")))?;
            file.sync_all().map_err(|e| GatewayError::Internal(format!("sync history file: {e}")))?;
        }
        Ok(())
    }
}

fn read_day_file(path: &Path) -> Result<Vec<HistoryEntry>, GatewayError> {
    let file = fs::File::open(path).map_err(|e| GatewayError::Internal(format!("open history file: {e}")))?;
    let reader = BufReader::new(file);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| GatewayError::Internal(format!("read history file: {e}")))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<HistoryEntry>(trimmed) {
            out.push(entry);
        }
    }
    Ok(out)
}
