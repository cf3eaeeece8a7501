//! C7 Auth Registry: in-memory map with a JSON-per-record disk mirror.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::Utc;
use gateway_error::GatewayError;

use crate::model::{Auth, ModelStatus};
use crate::runtime::RuntimePauseRegistry;

#[derive(Debug, Clone, Default)]
pub struct ResetCooldownFilter {
    pub auth_id: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// In-memory `ID -> Auth` map with RW-lock semantics and a one-JSON-file-per-record
/// disk mirror. Mutations are serialized through `update`; readers see a
/// consistent snapshot.
pub struct AuthRegistry {
    auths: RwLock<HashMap<String, Auth>>,
    dir: PathBuf,
    pub runtime_pauses: RuntimePauseRegistry,
}

impl AuthRegistry {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { auths: RwLock::new(HashMap::new()), dir: dir.into(), runtime_pauses: RuntimePauseRegistry::new() }
    }

    /// Loads every `*.json` file under `dir` into memory.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self, GatewayError> {
        let dir = dir.into();
        let mut map = HashMap::new();
        if dir.exists() {
            let entries = std::fs::read_dir(&dir).map_err(|e| GatewayError::Internal(format!("read auth dir: {e}")))?;
            for entry in entries {
                let entry = entry.map_err(|e| GatewayError::Internal(format!("read dir entry: {e}")))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let raw = std::fs::read_to_string(&path).map_err(|e| GatewayError::Internal(format!("read auth file: {e}")))?;
                let auth: Auth = serde_json::from_str(&raw).map_err(|e| GatewayError::Internal(format!("parse auth file: {e}")))?;
                map.insert(auth.id.clone(), auth);
            }
        }
        Ok(Self { auths: RwLock::new(map), dir, runtime_pauses: RuntimePauseRegistry::new() })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn get_by_id(&self, id: &str) -> Option<Auth> {
        self.auths.read().unwrap().get(id).cloned()
    }

    /// Returns a shallow copy of every record.
    pub fn list(&self) -> Vec<Auth> {
        self.auths.read().unwrap().values().cloned().collect()
    }

    /// Applies `mutator` to the record for `id` under the write lock,
    /// bumps `updated_at`, persists to disk, and returns the updated record.
    pub fn update(&self, id: &str, mutator: impl FnOnce(&mut Auth)) -> Result<Auth, GatewayError> {
        let mut guard = self.auths.write().unwrap();
        let auth = guard.get_mut(id).ok_or_else(|| GatewayError::NotFound(format!("auth {id}")))?;
        mutator(auth);
        auth.updated_at = Utc::now();
        let snapshot = auth.clone();
        drop(guard);
        self.persist(&snapshot)?;
        Ok(snapshot)
    }

    pub fn save(&self, auth: Auth) -> Result<(), GatewayError> {
        self.persist(&auth)?;
        self.auths.write().unwrap().insert(auth.id.clone(), auth);
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<(), GatewayError> {
        self.auths.write().unwrap().remove(id);
        let path = self.record_path(id);
        if path.exists() {
            std::fs::remove_file(&path).map_err(|e| GatewayError::Internal(format!("remove auth file: {e}")))?;
        }
        Ok(())
    }

    fn persist(&self, auth: &Auth) -> Result<(), GatewayError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| GatewayError::Internal(format!("create auth dir: {e}")))?;
        let raw = serde_json::to_vec_pretty(auth).map_err(|e| GatewayError::Internal(format!("serialize auth: {e}")))?;
        crate::atomic_write(&self.record_path(&auth.id), &raw)
            .map_err(|e| GatewayError::Internal(format!("write auth file: {e}")))
    }

    /// Clears quota/unavailable/retry state on records matching `filter`
    /// (and on their matching per-model sub-states), then notifies the
    /// runtime pause registry.
    pub fn reset_cooldown(&self, filter: &ResetCooldownFilter) -> Result<usize, GatewayError> {
        let mut guard = self.auths.write().unwrap();
        let mut reset_count = 0usize;
        for auth in guard.values_mut() {
            if let Some(id) = &filter.auth_id {
                if &auth.id != id {
                    continue;
                }
            }
            if let Some(provider) = &filter.provider {
                if &auth.provider != provider {
                    continue;
                }
            }
            let matched = if let Some(model) = &filter.model {
                if let Some(state) = auth.model_states.get_mut(model) {
                    state.unavailable = false;
                    state.next_retry_after = None;
                    state.quota = Default::default();
                    state.status = ModelStatus::Active;
                    state.last_error.clear();
                    self.runtime_pauses.clear(&auth.id, model);
                    true
                } else {
                    false
                }
            } else {
                auth.quota = Default::default();
                auth.unavailable = false;
                auth.next_retry_after = None;
                auth.status_message.clear();
                auth.last_error.clear();
                for (model, state) in auth.model_states.iter_mut() {
                    state.unavailable = false;
                    state.next_retry_after = None;
                    state.quota = Default::default();
                    state.status = ModelStatus::Active;
                    state.last_error.clear();
                    self.runtime_pauses.clear(&auth.id, model);
                }
                true
            };
            if matched {
                auth.updated_at = Utc::now();
                reset_count += 1;
            }
        }
        let snapshots: Vec<Auth> = guard.values().cloned().collect();
        drop(guard);
        for snapshot in snapshots {
            self.persist(&snapshot)?;
        }
        Ok(reset_count)
    }
}
