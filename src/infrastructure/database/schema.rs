//! Table definitions and schema bootstrap.

use crate::error::DbError;

use super::pool::Database;

/// Every table owned by this crate, in creation order.
pub const TABLES: &[&str] = &[
    "job_applications",
    "application_interactions",
    "job_skills",
    "search_history",
];

const SCHEMA: &[(&str, &str)] = &[
    (
        "create_job_applications",
        r#"
        CREATE TABLE IF NOT EXISTS job_applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id TEXT NOT NULL,
            job_title TEXT NOT NULL,
            company TEXT NOT NULL,
            source TEXT NOT NULL,
            match_score REAL NOT NULL CHECK (match_score >= 0.0 AND match_score <= 1.0),
            status TEXT NOT NULL DEFAULT 'applied',
            resume_path TEXT,
            cover_letter_path TEXT,
            url TEXT,
            notes TEXT,
            response_received BOOLEAN NOT NULL DEFAULT 0,
            response_date TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (job_id, source)
        )
        "#,
    ),
    (
        "create_idx_job_applications_company",
        "CREATE INDEX IF NOT EXISTS idx_job_applications_company ON job_applications (company)",
    ),
    (
        "create_idx_job_applications_status",
        "CREATE INDEX IF NOT EXISTS idx_job_applications_status ON job_applications (status)",
    ),
    (
        "create_application_interactions",
        r#"
        CREATE TABLE IF NOT EXISTS application_interactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_id INTEGER NOT NULL REFERENCES job_applications (id),
            interaction_type TEXT NOT NULL,
            notes TEXT,
            next_steps TEXT,
            outcome TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    ),
    (
        "create_idx_application_interactions_application",
        "CREATE INDEX IF NOT EXISTS idx_application_interactions_application ON application_interactions (application_id)",
    ),
    (
        "create_job_skills",
        r#"
        CREATE TABLE IF NOT EXISTS job_skills (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            application_id INTEGER NOT NULL REFERENCES job_applications (id),
            skill_name TEXT NOT NULL,
            skill_category TEXT NOT NULL DEFAULT 'technical',
            required BOOLEAN NOT NULL DEFAULT 1,
            candidate_has BOOLEAN NOT NULL DEFAULT 0,
            match_score REAL NOT NULL DEFAULT 0.0
        )
        "#,
    ),
    (
        "create_search_history",
        r#"
        CREATE TABLE IF NOT EXISTS search_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            searched_at TEXT NOT NULL,
            keywords TEXT NOT NULL,
            location TEXT,
            source TEXT NOT NULL,
            results_count INTEGER NOT NULL DEFAULT 0,
            filtered_count INTEGER NOT NULL DEFAULT 0,
            search_params TEXT NOT NULL DEFAULT '{}'
        )
        "#,
    ),
];

impl Database {
    /// Create the storage directory (for file-backed stores) and every table
    /// that does not exist yet. Safe to call repeatedly.
    pub async fn init_schema(&self) -> Result<(), DbError> {
        if let Some(parent) = self.file_path().and_then(|path| path.parent()) {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    DbError::connection(
                        format!("cannot create storage directory {}", parent.display()),
                        e,
                    )
                })?;
            }
        }

        self.transaction("init_schema", |session| {
            Box::pin(async move {
                for (label, ddl) in SCHEMA {
                    session.execute(label, sqlx::query(ddl)).await?;
                }
                Ok(())
            })
        })
        .await?;

        tracing::info!(tables = TABLES.len(), "Database schema initialized");
        Ok(())
    }
}
