//! Engine, session, retry and health integration tests
//!
//! These tests exercise the store plumbing directly, without the tracker.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;
use uuid::Uuid;

use job_application_tracker::config::DatabaseConfig;
use job_application_tracker::database::{
    BackoffConfig, Database, HealthStatus, QueryMonitor, RetryPolicy, SessionState, TABLES,
};
use job_application_tracker::error::{DbError, ErrorKind};

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(
        max_attempts,
        BackoffConfig {
            initial_delay_ms: 5,
            max_delay_ms: 20,
            multiplier: 2.0,
            jitter_factor: 0.0,
        },
    )
}

fn file_config(dir: &TempDir) -> DatabaseConfig {
    let path = dir.path().join("data").join("job_applications.db");
    DatabaseConfig::with_url(format!("sqlite://{}", path.display()))
}

fn connect(config: &DatabaseConfig) -> Database {
    Database::connect(config, fast_retry(3), Arc::new(QueryMonitor::default())).unwrap()
}

async fn count_searches(db: &Database) -> i64 {
    db.with_session(|session| {
        Box::pin(async move {
            session
                .fetch_scalar("count_searches", sqlx::query_scalar("SELECT COUNT(*) FROM search_history"))
                .await
        })
    })
    .await
    .unwrap()
}

fn insert_search(keywords: &str) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        "INSERT INTO search_history (searched_at, keywords, source) VALUES (datetime('now'), ?, 'linkedin')",
    )
    .bind(keywords)
}

fn connection_reset() -> DbError {
    DbError::from(sqlx::Error::Io(io::Error::new(
        io::ErrorKind::ConnectionReset,
        "connection reset by peer",
    )))
}

#[tokio::test]
async fn test_init_schema_creates_directory_and_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));

    db.init_schema().await.unwrap();
    db.init_schema().await.unwrap();

    assert!(dir.path().join("data").join("job_applications.db").exists());
    let stats = db.get_database_stats().await;
    assert!(stats.is_healthy());
    assert_eq!(stats.tables.len(), TABLES.len());
}

#[tokio::test]
async fn test_init_schema_unwritable_location_is_connection_error() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not_a_directory");
    std::fs::write(&blocker, b"occupied").unwrap();

    let config = DatabaseConfig::with_url(format!(
        "sqlite://{}",
        blocker.join("nested").join("jobs.db").display()
    ));
    let db = connect(&config);

    let err = db.init_schema().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_check_connection_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    assert_eq!(db.check_connection().await, (true, None));
    assert_eq!(db.check_connection().await, (true, None));
    assert_eq!(db.get_database_stats().await.tables["job_applications"].row_count, 0);
}

#[tokio::test]
async fn test_stats_on_fresh_store() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let stats = db.get_database_stats().await;
    assert_eq!(stats.status, HealthStatus::Healthy);
    assert!(stats.error.is_none());
    for table in TABLES {
        assert_eq!(stats.tables[*table].row_count, 0, "table {}", table);
    }
    assert_eq!(stats.connection_pool.size, 5);
    assert_eq!(stats.connection_pool.max_connections, 15);

    let json = serde_json::to_value(&stats).unwrap();
    assert_eq!(json["status"], "healthy");
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_stats_report_missing_schema_as_error() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    std::fs::create_dir_all(dir.path().join("data")).unwrap();

    let stats = db.get_database_stats().await;
    assert_eq!(stats.status, HealthStatus::Error);
    assert!(stats.error.is_some());
    assert!(stats.tables.is_empty());
}

#[tokio::test]
async fn test_check_connection_reports_failure() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let config = DatabaseConfig::with_url(format!("sqlite://{}", blocker.join("jobs.db").display()));
    let db = Database::connect(&config, fast_retry(1), Arc::new(QueryMonitor::default())).unwrap();

    let (ok, error) = db.check_connection().await;
    assert!(!ok);
    assert!(error.is_some());
}

#[tokio::test]
async fn test_committed_session_is_visible() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let mut session = db.session().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    session.execute("insert_search", insert_search("rust")).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(session.state(), SessionState::Committed);
    assert!(format!("{:?}", session).contains("Committed"));

    let err = session
        .execute("insert_search", insert_search("again"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    drop(session);

    assert_eq!(count_searches(&db).await, 1);
}

#[tokio::test]
async fn test_dropped_session_rolls_back() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    {
        let mut session = db.session().await.unwrap();
        session.execute("insert_search", insert_search("rust")).await.unwrap();
    }

    assert_eq!(count_searches(&db).await, 0);
}

#[tokio::test]
async fn test_with_session_rolls_back_on_error() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let result: Result<(), DbError> = db
        .with_session(|session| {
            Box::pin(async move {
                session.execute("insert_search", insert_search("rust")).await?;
                Err(DbError::validation("abandon"))
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::Validation(msg)) if msg == "abandon"));
    assert_eq!(count_searches(&db).await, 0);
}

#[tokio::test]
async fn test_failed_statement_is_classified_and_rolled_back() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let err = db
        .transaction("bad_insert", |session| {
            Box::pin(async move {
                session.execute("insert_search", insert_search("rust")).await?;
                session
                    .execute("insert_bad_score", sqlx::query(
                        "INSERT INTO job_applications (job_id, job_title, company, source, match_score, created_at, updated_at) \
                         VALUES ('J1', 'Engineer', 'Acme', 'linkedin', 7.0, datetime('now'), datetime('now'))",
                    ))
                    .await?;
                Ok(())
            })
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Database);
    assert_eq!(count_searches(&db).await, 0);
    assert_eq!(db.monitor().get("insert_bad_score").unwrap().count, 1);
}

#[tokio::test]
async fn test_pool_exhaustion_is_connection_error() {
    let dir = TempDir::new().unwrap();
    let mut config = file_config(&dir);
    config.pool_size = 1;
    config.max_overflow = 1;
    config.pool_timeout_seconds = 1;
    let db = connect(&config);
    db.init_schema().await.unwrap();

    let first = db.session().await.unwrap();
    let second = db.session().await.unwrap();
    assert_ne!(first.id(), second.id());

    let stats = db.pool_stats();
    assert_eq!(stats.checked_out, 2);
    assert_eq!(stats.overflow, 1);

    let started = Instant::now();
    let err = db.session().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
    assert!(started.elapsed() >= Duration::from_millis(900));

    drop(first);
    drop(second);
}

#[tokio::test]
async fn test_pool_exhaustion_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let mut config = file_config(&dir);
    config.pool_size = 1;
    config.max_overflow = 0;
    config.pool_timeout_seconds = 1;
    let db = connect(&config);
    db.init_schema().await.unwrap();

    let _held = db.session().await.unwrap();
    let started = Instant::now();
    let (ok, error) = db.check_connection().await;

    assert!(!ok);
    assert!(error.unwrap().contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_retry_uses_fresh_session_per_attempt() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let sessions: Arc<Mutex<Vec<Uuid>>> = Arc::new(Mutex::new(Vec::new()));

    let id = db
        .transaction("flaky_insert", |session| {
            let attempts = attempts.clone();
            let sessions = sessions.clone();
            Box::pin(async move {
                sessions.lock().unwrap().push(session.id());
                session.execute("insert_search", insert_search("rust")).await?;
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(connection_reset());
                }
                session
                    .fetch_scalar::<i64, _>("last_id", sqlx::query_scalar("SELECT last_insert_rowid()"))
                    .await
            })
        })
        .await
        .unwrap();

    assert!(id > 0);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let sessions = sessions.lock().unwrap().clone();
    assert_eq!(sessions.len(), 3);
    assert_ne!(sessions[0], sessions[1]);
    assert_ne!(sessions[1], sessions[2]);

    assert_eq!(count_searches(&db).await, 1);
}

#[tokio::test]
async fn test_retry_exhaustion_returns_last_transient_error() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let attempts = Arc::new(AtomicU32::new(0));
    let err = db
        .transaction("always_flaky", |session| {
            let attempts = attempts.clone();
            Box::pin(async move {
                session.execute("insert_search", insert_search("rust")).await?;
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(connection_reset())
            })
        })
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(count_searches(&db).await, 0);
}

#[tokio::test]
async fn test_in_memory_store_survives_across_sessions() {
    let mut config = DatabaseConfig::with_url("sqlite::memory:");
    config.pool_size = 1;
    config.max_overflow = 0;
    let db = connect(&config);

    db.init_schema().await.unwrap();
    db.with_session(|session| {
        Box::pin(async move {
            session.execute("insert_search", insert_search("rust")).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    assert_eq!(count_searches(&db).await, 1);
    assert!(db.file_path().is_none());
}

#[tokio::test]
async fn test_query_monitor_tracks_statements() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    for _ in 0..3 {
        db.check_connection().await;
    }

    let frequent = db.monitor().most_frequent(1);
    assert_eq!(frequent.len(), 1);
    assert!(frequent[0].stats.count >= 3);
    assert!(db.monitor().slow_queries(Some(Duration::from_secs(60))).is_empty());
}

#[tokio::test]
async fn test_exhausted_pool_error_is_printable() {
    let dir = TempDir::new().unwrap();
    let mut config = file_config(&dir);
    config.pool_size = 1;
    config.max_overflow = 0;
    config.pool_timeout_seconds = 1;
    let db = connect(&config);
    db.init_schema().await.unwrap();

    let held = db.session().await.unwrap();
    let debug = format!("{:?}", held);
    assert!(debug.contains(&held.id().to_string()));
    assert!(debug.contains("Active"));

    let err = db.session().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[tokio::test]
async fn test_backup_copies_committed_rows() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();
    db.with_session(|session| {
        Box::pin(async move {
            session.execute("insert_search", insert_search("rust")).await?;
            Ok(())
        })
    })
    .await
    .unwrap();

    let destination = dir.path().join("backups").join("jobs.db");
    let written = db.backup(&destination).await.unwrap();
    assert_eq!(written, destination);
    assert!(destination.exists());

    let copy = connect(&DatabaseConfig::with_url(format!(
        "sqlite://{}",
        destination.display()
    )));
    assert_eq!(count_searches(&copy).await, 1);
    assert_eq!(db.monitor().get("vacuum_into").unwrap().count, 1);
}

#[tokio::test]
async fn test_backup_never_overwrites() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let destination = dir.path().join("existing.db");
    std::fs::write(&destination, b"keep me").unwrap();

    let err = db.backup(&destination).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(std::fs::read(&destination).unwrap(), b"keep me");
}

#[tokio::test]
async fn test_default_backup_path() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    let path = db.default_backup_path().unwrap();
    assert!(path
        .to_string_lossy()
        .contains("job_applications.db.backup-"));

    let memory = connect(&DatabaseConfig::with_url("sqlite::memory:"));
    assert!(memory.default_backup_path().is_none());
}

#[tokio::test]
async fn test_metrics_report_on_healthy_store() {
    let dir = TempDir::new().unwrap();
    let db = connect(&file_config(&dir));
    db.init_schema().await.unwrap();

    let text = db.metrics_report().await.unwrap();
    assert!(text.contains("jobtrack_db_queries_total"));
    assert!(text.contains("jobtrack_db_pool_idle_connections"));
}

#[tokio::test]
async fn test_metrics_report_survives_failed_check() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("file");
    std::fs::write(&blocker, b"x").unwrap();
    let config = DatabaseConfig::with_url(format!("sqlite://{}", blocker.join("jobs.db").display()));
    let db = Database::connect(&config, fast_retry(1), Arc::new(QueryMonitor::default())).unwrap();

    let text = db.metrics_report().await.unwrap();
    assert!(text.contains("jobtrack_db_errors_total"));
    assert!(text.contains("jobtrack_db_pool_in_use_connections"));
}
