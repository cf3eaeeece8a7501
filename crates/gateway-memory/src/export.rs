//! C5 Export/Import: zip snapshots of a session directory or the full
//! memory base, with a path-traversal guard on import.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use gateway_error::GatewayError;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Zips all regular files under `dir`, with paths relativized to `dir` using
/// forward slashes.
pub fn export_session_zip(dir: &Path) -> Result<Vec<u8>, GatewayError> {
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = ZipWriter::new(cursor);
        let options = SimpleFileOptions::default();
        write_dir_into_zip(&mut writer, dir, dir, &options, None)?;
        writer.finish().map_err(|e| GatewayError::Internal(format!("finish zip: {e}")))?;
    }
    Ok(buf)
}

/// Zips all regular files under `base_dir` recursively; fails if the
/// resulting archive would exceed `size_cap` bytes.
pub fn export_all_zip(base_dir: &Path, size_cap: u64) -> Result<Vec<u8>, GatewayError> {
    let mut buf = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buf);
        let mut writer = ZipWriter::new(cursor);
        let options = SimpleFileOptions::default();
        write_dir_into_zip(&mut writer, base_dir, base_dir, &options, Some(size_cap))?;
        writer.finish().map_err(|e| GatewayError::Internal(format!("finish zip: {e}")))?;
    }
    if buf.len() as u64 > size_cap {
        return Err(GatewayError::Permanent(format!(
            "export exceeds size cap: {} > {}",
            buf.len(),
            size_cap
        )));
    }
    Ok(buf)
}

fn write_dir_into_zip<W: std::io::Write + std::io::Seek>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    current: &Path,
    options: &SimpleFileOptions,
    size_cap: Option<u64>,
) -> Result<(), GatewayError> {
    let mut written = 0u64;
    write_dir_into_zip_inner(writer, root, current, options, size_cap, &mut written)
}

fn write_dir_into_zip_inner<W: std::io::Write + std::io::Seek>(
    writer: &mut ZipWriter<W>,
    root: &Path,
    current: &Path,
    options: &SimpleFileOptions,
    size_cap: Option<u64>,
    written: &mut u64,
) -> Result<(), GatewayError> {
    let entries =
        std::fs::read_dir(current).map_err(|e| GatewayError::Internal(format!("read dir: {e}")))?;
    for entry in entries {
        let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
        let path = entry.path();
        if path.is_dir() {
            write_dir_into_zip_inner(writer, root, &path, options, size_cap, written)?;
        } else if path.is_file() {
            let mut contents = Vec::new();
            std::fs::File::open(&path)
                .and_then(|mut f| f.read_to_end(&mut contents))
                .map_err(|e| GatewayError::Internal(format!("read file for zip: {e}")))?;
            *written += contents.len() as u64;
            if let Some(cap) = size_cap {
                if *written > cap {
                    return Err(GatewayError::Permanent("export exceeds size cap".into()));
                }
            }
            let rel = path
                .strip_prefix(root)
                .map_err(|e| GatewayError::Internal(format!("relativize path: {e}")))?;
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            writer
                .start_file(rel_str, *options)
                .map_err(|e| GatewayError::Internal(format!("start zip entry: {e}")))?;
            writer
                .write_all(&contents)
                .map_err(|e| GatewayError::Internal(format!("write zip entry: {e}")))?;
        }
    }
    Ok(())
}

/// Extracts `zip_bytes` into `dest_dir`. Entries whose relative path contains
/// `..`, or whose cleaned destination path escapes `dest_dir`, are silently
/// skipped.
pub fn import_zip(zip_bytes: &[u8], dest_dir: &Path) -> Result<(), GatewayError> {
    std::fs::create_dir_all(dest_dir).map_err(|e| GatewayError::Internal(format!("create dest dir: {e}")))?;
    let reader = std::io::Cursor::new(zip_bytes);
    let mut archive = ZipArchive::new(reader).map_err(|e| GatewayError::BadInput(format!("invalid zip: {e}")))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| GatewayError::Internal(format!("read zip entry: {e}")))?;
        let name = entry.name().to_string();
        if name.contains("..") {
            continue;
        }
        let target = dest_dir.join(&name);
        let cleaned = clean_path(&target);
        if !cleaned.starts_with(dest_dir) {
            continue;
        }
        if entry.is_dir() {
            let _ = std::fs::create_dir_all(&cleaned);
            continue;
        }
        if let Some(parent) = cleaned.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GatewayError::Internal(format!("create parent dir: {e}")))?;
        }
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .map_err(|e| GatewayError::Internal(format!("read zip entry contents: {e}")))?;
        std::fs::write(&cleaned, contents).map_err(|e| GatewayError::Internal(format!("write imported file: {e}")))?;
    }
    Ok(())
}

/// Lexically normalizes `path` (no filesystem access), resolving `.` and `..`
/// components, mirroring `filepath.Clean` semantics used by the guard.
fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::ParentDir => {
                out.pop();
            }
            std::path::Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}
