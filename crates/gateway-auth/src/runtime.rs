//! Runtime pause registry: tracks `(auth_id, model)` pairs C8 has paused
//! after a quota/auth failure, independent of the persisted `Auth` record.
//! Sharded, read-mostly — matches `adk-auth`'s use of `dashmap` for this
//! shape of problem.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct RuntimePauseRegistry {
    paused: DashMap<(String, String), DateTime<Utc>>,
}

impl RuntimePauseRegistry {
    pub fn new() -> Self {
        Self { paused: DashMap::new() }
    }

    pub fn pause_until(&self, auth_id: &str, model: &str, until: DateTime<Utc>) {
        self.paused.insert((auth_id.to_string(), model.to_string()), until);
    }

    pub fn is_paused(&self, auth_id: &str, model: &str) -> bool {
        match self.paused.get(&(auth_id.to_string(), model.to_string())) {
            Some(until) => *until > Utc::now(),
            None => false,
        }
    }

    pub fn clear(&self, auth_id: &str, model: &str) {
        self.paused.remove(&(auth_id.to_string(), model.to_string()));
    }
}
