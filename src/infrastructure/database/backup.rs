//! Online backups of SQLite stores.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;

use crate::error::DbError;
use crate::metrics::QueryMetrics;

use super::pool::Database;
use super::retry::with_retry;

impl Database {
    /// Default backup location next to the store file:
    /// `<file>.backup-YYYYmmdd-HHMMSS`. `None` for in-memory stores.
    pub fn default_backup_path(&self) -> Option<PathBuf> {
        let path = self.file_path()?;
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        Some(PathBuf::from(format!("{}.backup-{}", path.display(), stamp)))
    }

    /// Write a consistent copy of the store to `destination` with
    /// `VACUUM INTO`, under the retry policy.
    ///
    /// SQLite refuses `VACUUM` inside a transaction, so this runs on a plain
    /// pooled connection instead of a session. An existing destination is
    /// never overwritten.
    pub async fn backup(&self, destination: &Path) -> Result<PathBuf, DbError> {
        if destination.exists() {
            return Err(DbError::validation(format!(
                "backup destination {} already exists",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DbError::connection(
                        format!("cannot create backup directory {}", parent.display()),
                        e,
                    )
                })?;
            }
        }

        let target = destination.to_string_lossy().into_owned();
        with_retry(self.retry_policy(), "backup", || async {
            let started = Instant::now();
            let result = sqlx::query("VACUUM INTO ?")
                .bind(target.as_str())
                .execute(self.pool())
                .await;
            self.monitor().record("vacuum_into", started.elapsed());
            result.map(|_| ()).map_err(|e| {
                let err = DbError::from(e);
                QueryMetrics::record_error(err.kind());
                err
            })
        })
        .await?;

        tracing::info!(destination = %destination.display(), "Database backed up");
        Ok(destination.to_path_buf())
    }
}
