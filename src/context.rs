use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::config::Settings;
use crate::database::{Database, QueryMonitor, RetryPolicy};
use crate::domain::application::ApplicationTracker;
use crate::error::DbError;

/// Top-level owner of the shared connection pool.
///
/// The pool is built on first use and then reused by every caller; concurrent
/// first calls still construct it only once.
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub monitor: Arc<QueryMonitor>,
    database: Arc<OnceCell<Database>>,
}

impl AppContext {
    pub fn new(settings: Settings) -> Self {
        let monitor = Arc::new(QueryMonitor::from_config(&settings.monitor));

        Self {
            settings: Arc::new(settings),
            monitor,
            database: Arc::new(OnceCell::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared pool handle, created on the first call.
    pub async fn engine(&self) -> Result<&Database, DbError> {
        self.database
            .get_or_try_init(|| async {
                Database::connect(
                    &self.settings.database,
                    RetryPolicy::from(&self.settings.retry),
                    self.monitor.clone(),
                )
            })
            .await
    }

    pub fn is_initialized(&self) -> bool {
        self.database.initialized()
    }

    pub async fn tracker(&self) -> Result<ApplicationTracker, DbError> {
        Ok(ApplicationTracker::new(self.engine().await?.clone()))
    }

    /// Close the pool if it was ever opened.
    pub async fn shutdown(&self) {
        if let Some(db) = self.database.get() {
            db.close().await;
        }
    }
}
