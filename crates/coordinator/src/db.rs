//! Persistent store: connection pool and schema

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Open the SQLite pool in WAL mode and ensure the schema exists.
pub async fn connect(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id TEXT PRIMARY KEY NOT NULL,
            username TEXT UNIQUE NOT NULL,
            email TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'user',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            kraus_id TEXT,
            best_moe REAL NOT NULL DEFAULT -1.0,
            best_vector_id TEXT,
            minimization_attempts INTEGER NOT NULL DEFAULT 100,
            runs_spawned INTEGER NOT NULL DEFAULT 0,
            runs_completed INTEGER NOT NULL DEFAULT 0,
            input_dimension INTEGER NOT NULL,
            output_dimension INTEGER NOT NULL,
            num_kraus INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'created'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            input_data TEXT NOT NULL DEFAULT '{}',
            kraus_operator TEXT,
            vector TEXT,
            entropy REAL NOT NULL DEFAULT -1.0,
            num_iterations INTEGER NOT NULL DEFAULT 0,
            time_created INTEGER NOT NULL,
            time_started INTEGER,
            time_finished INTEGER,
            last_update INTEGER NOT NULL,
            worker_id TEXT,
            channel_id INTEGER,
            priority INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_channel ON jobs(channel_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id TEXT PRIMARY KEY NOT NULL,
            file_type TEXT NOT NULL,
            full_path TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("persistent schema ready");
    Ok(())
}
