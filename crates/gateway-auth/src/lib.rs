//! C7 Auth Registry: holds `Auth` records, per-record quota/cooldown state,
//! per-model state, and lifecycle updates.

pub mod model;
pub mod registry;
pub mod runtime;

pub use model::{Auth, ModelState, ModelStatus, Quota, Usage};
pub use registry::{AuthRegistry, ResetCooldownFilter};
pub use runtime::RuntimePauseRegistry;

/// Atomically overwrites `path` via a sibling temp file, fsync, then rename
/// — matches the discipline `gateway-memory` uses for overwrite files.
pub(crate) fn atomic_write(path: &std::path::Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
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
