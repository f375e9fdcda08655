// src/api/state.rs
use crate::channel::{ChannelFactory, PythonChannelFactory};
use crate::config::AppConfig;
use crate::database::TaskDraftSink;
use crate::registry::SessionRegistry;
use crate::session::{DraftSink, SessionConfig};
use sqlx::SqlitePool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db_pool: SqlitePool,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: AppConfig, db_pool: SqlitePool) -> Self {
        let factory = Arc::new(PythonChannelFactory::new(config.runtime.clone()));
        Self::with_factory(config, db_pool, factory)
    }

    /// State backed by a custom channel factory instead of CPython.
    pub fn with_factory(config: AppConfig, db_pool: SqlitePool, factory: Arc<dyn ChannelFactory>) -> Self {
        let sessions = SessionRegistry::new(factory, SessionConfig::from(&config.runtime), config.session_idle_ttl);
        Self {
            config: Arc::new(config),
            db_pool,
            sessions: Arc::new(sessions),
        }
    }

    pub fn drafts(&self, student: &str, task_id: i64) -> Arc<dyn DraftSink> {
        Arc::new(TaskDraftSink::new(self.db_pool.clone(), student, task_id))
    }
}
