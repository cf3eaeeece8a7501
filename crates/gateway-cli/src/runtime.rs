//! Process-scoped `Runtime`: the handles the CLI subcommands share, built
//! once at startup and passed by reference. Avoids the init-order hazards
//! of scattered global statics.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use gateway_auth::AuthRegistry;
use gateway_config::AppConfig;
use gateway_history::RequestHistory;
use gateway_memory::event_log::EventLog;

pub struct Runtime {
    pub config: AppConfig,
    pub event_log: Arc<EventLog>,
    pub auth_registry: Arc<AuthRegistry>,
    pub history: Arc<RequestHistory>,
}

impl Runtime {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config = AppConfig::load_from(config_path);
        let event_log = Arc::new(EventLog::new(gateway_memory::sessions_root(&config.memory.base_dir)));
        let auth_registry = Arc::new(AuthRegistry::load(config.memory.base_dir.join("auth"))?);
        let history = Arc::new(RequestHistory::with_capacity(config.memory.base_dir.join("history"), config.history.capacity));
        Ok(Self { config, event_log, auth_registry, history })
    }
}
