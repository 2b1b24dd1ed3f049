//! SQLite connection pool and schema bootstrap.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::{str::FromStr, time::Duration};
use tracing::{Instrument, debug, info_span};

/// Schema applied on every startup; all statements are idempotent.
pub const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// Extended result codes for SQLITE_CONSTRAINT_UNIQUE and SQLITE_CONSTRAINT_PRIMARYKEY.
const SQLITE_CONSTRAINT_UNIQUE: &str = "2067";
const SQLITE_CONSTRAINT_PRIMARYKEY: &str = "1555";

/// Open (creating if needed) the database behind `dsn` and apply the schema.
///
/// The database runs in WAL mode with a busy timeout so concurrent writers
/// queue on SQLite's single write lock instead of failing.
///
/// # Errors
/// Returns an error if the DSN is invalid, the database cannot be opened or
/// the schema cannot be applied.
pub async fn connect(dsn: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(dsn)
        .with_context(|| format!("Invalid database DSN: {dsn}"))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(max_connections.max(1))
        .max_lifetime(Duration::from_secs(60 * 30))
        .test_before_acquire(true)
        .connect_with(options)
        .await
        .context("Failed to connect to database")?;

    apply_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database, used by tests and throwaway runs.
///
/// The connection is never recycled: dropping it would drop the database.
///
/// # Errors
/// Returns an error if the database cannot be opened or the schema fails.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .context("Invalid in-memory DSN")?
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .context("Failed to open in-memory database")?;

    apply_schema(&pool).await?;

    Ok(pool)
}

/// Apply `sql/schema.sql` statement by statement.
///
/// # Errors
/// Returns an error naming the first statement that failed.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    for statement in split_sql_statements(SCHEMA_SQL) {
        let span = info_span!(
            "db.query",
            db.system = "sqlite",
            db.operation = "DDL",
            db.statement = statement.as_str()
        );
        sqlx::query(&statement)
            .execute(pool)
            .instrument(span)
            .await
            .with_context(|| format!("failed to apply schema statement: {statement}"))?;
    }
    debug!("Database schema is up to date");
    Ok(())
}

/// Split a SQL script on `;`, dropping `--` comments and blank statements.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let line = line.split("--").next().unwrap_or_default().trim_end();
        if line.trim().is_empty() {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if line.ends_with(';') {
            let statement = current.trim().trim_end_matches(';').trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }

    statements
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| {
            code.as_ref() == SQLITE_CONSTRAINT_UNIQUE || code.as_ref() == SQLITE_CONSTRAINT_PRIMARYKEY
        }),
        _ => false,
    }
}
