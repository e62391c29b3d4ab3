//! SQLite-backed persistent store
//!
//! This module owns the durable state of the library:
//! - `config` key/value settings
//! - `event` records
//! - `log` lines drained from the side file
//!
//! Table operations take a `&mut SqliteConnection` so the same call works on a
//! pooled connection or inside an open transaction.

use crate::error::{NvmError, Result};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
};
use sqlx::{Row, Sqlite, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest accepted configuration key.
pub const MAX_CONFIG_KEY_LEN: usize = 256;

/// Tables with a row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Config,
    Event,
    Log,
}

impl Table {
    fn name(&self) -> &'static str {
        match self {
            Table::Config => "config",
            Table::Event => "event",
            Table::Log => "log",
        }
    }
}

/// Event table row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventRow {
    pub id: i64,
    pub event_type: i64,
    pub severity: i64,
    pub code: i64,
    pub uid: Option<String>,
    pub action_required: bool,
    pub time: i64,
    pub arg1: Option<String>,
    pub arg2: Option<String>,
    pub arg3: Option<String>,
    pub diag_result: i64,
}

/// Log table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub id: i64,
    pub thread_id: i64,
    pub time: i64,
    pub level: i64,
    pub file_name: String,
    pub line_number: i64,
    pub message: String,
}

/// Durable store handle.
pub struct PersistentStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl PersistentStore {
    /// Open (creating if missing) the store at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30))
            .pragma("synchronous", "NORMAL");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path = %path.display(), "Persistent store opened");
        Ok(Self { pool, path })
    }

    /// Recreate the store from scratch, discarding any existing contents,
    /// including the pending log side file.
    ///
    /// The caller seeds default settings afterwards.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        for suffix in ["", "-wal", "-shm", ".log"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match std::fs::remove_file(PathBuf::from(file)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Side file holding log lines not yet drained into the `log` table.
    pub fn log_path(&self) -> PathBuf {
        let mut file = self.path.as_os_str().to_owned();
        file.push(".log");
        PathBuf::from(file)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Run arbitrary SQL, returning the number of affected rows.
    pub async fn run_custom_sql(&self, sql: &str) -> Result<u64> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Close every pooled connection. Later operations fail with `Unknown`.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

pub async fn row_count(conn: &mut SqliteConnection, table: Table) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    let count: i64 = sqlx::query_scalar(&sql).fetch_one(conn).await?;
    Ok(count)
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_CONFIG_KEY_LEN {
        return Err(NvmError::InvalidParameter);
    }
    Ok(())
}

pub async fn config_get(conn: &mut SqliteConnection, key: &str) -> Result<Option<String>> {
    check_key(key)?;
    let value: Option<String> = sqlx::query_scalar("SELECT value FROM config WHERE key = ?")
        .bind(key)
        .fetch_optional(conn)
        .await?;
    Ok(value)
}

pub async fn config_upsert(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    check_key(key)?;
    sqlx::query(
        "INSERT INTO config (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(conn)
    .await?;
    Ok(())
}

/// Delete a setting, returning whether a row existed.
pub async fn config_delete(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    check_key(key)?;
    let result = sqlx::query("DELETE FROM config WHERE key = ?")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn event_from_row(row: &sqlx::sqlite::SqliteRow) -> EventRow {
    EventRow {
        id: row.get("id"),
        event_type: row.get("type"),
        severity: row.get("severity"),
        code: row.get("code"),
        uid: row.get("uid"),
        action_required: row.get::<i64, _>("action_required") != 0,
        time: row.get("time"),
        arg1: row.get("arg1"),
        arg2: row.get("arg2"),
        arg3: row.get("arg3"),
        diag_result: row.get("diag_result"),
    }
}

const EVENT_COLUMNS: &str =
    "id, type, severity, code, uid, action_required, time, arg1, arg2, arg3, diag_result";

/// Insert an event and return its store-assigned id.
pub async fn event_insert(conn: &mut SqliteConnection, event: &EventRow) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO event (type, severity, code, uid, action_required, time, arg1, arg2, arg3, diag_result)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.event_type)
    .bind(event.severity)
    .bind(event.code)
    .bind(&event.uid)
    .bind(event.action_required as i64)
    .bind(event.time)
    .bind(&event.arg1)
    .bind(&event.arg2)
    .bind(&event.arg3)
    .bind(event.diag_result)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn event_get(conn: &mut SqliteConnection, id: i64) -> Result<Option<EventRow>> {
    let sql = format!("SELECT {} FROM event WHERE id = ?", EVENT_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    Ok(row.as_ref().map(event_from_row))
}

pub async fn event_update(conn: &mut SqliteConnection, id: i64, event: &EventRow) -> Result<()> {
    let result = sqlx::query(
        "UPDATE event SET type = ?, severity = ?, code = ?, uid = ?, action_required = ?,
                time = ?, arg1 = ?, arg2 = ?, arg3 = ?, diag_result = ?
         WHERE id = ?",
    )
    .bind(event.event_type)
    .bind(event.severity)
    .bind(event.code)
    .bind(&event.uid)
    .bind(event.action_required as i64)
    .bind(event.time)
    .bind(&event.arg1)
    .bind(&event.arg2)
    .bind(&event.arg3)
    .bind(event.diag_result)
    .bind(id)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(NvmError::NotFound);
    }
    Ok(())
}

pub async fn event_delete(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM event WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Every event in ascending id order.
pub async fn event_list(conn: &mut SqliteConnection) -> Result<Vec<EventRow>> {
    let sql = format!("SELECT {} FROM event ORDER BY id ASC", EVENT_COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(conn).await?;
    Ok(rows.iter().map(event_from_row).collect())
}

/// Highest event id ever visible, 0 when the table is empty.
pub async fn event_max_id(conn: &mut SqliteConnection) -> Result<i64> {
    let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM event")
        .fetch_one(conn)
        .await?;
    Ok(max.unwrap_or(0))
}

/// Delete up to `limit` of the oldest events that do not require action.
pub async fn event_trim_oldest(conn: &mut SqliteConnection, limit: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM event WHERE id IN (
             SELECT id FROM event WHERE action_required = 0 ORDER BY id ASC LIMIT ?
         )",
    )
    .bind(limit)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn log_insert(conn: &mut SqliteConnection, line: &LogRow) -> Result<i64> {
    let result = sqlx::query(
        "INSERT INTO log (thread_id, time, level, file_name, line_number, message)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(line.thread_id)
    .bind(line.time)
    .bind(line.level)
    .bind(&line.file_name)
    .bind(line.line_number)
    .bind(&line.message)
    .execute(conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Keep only the `keep` most recent log rows.
pub async fn log_roll(conn: &mut SqliteConnection, keep: i64) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM log WHERE id NOT IN (
             SELECT id FROM log ORDER BY time DESC, id DESC LIMIT ?
         )",
    )
    .bind(keep)
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Log rows, oldest first.
pub async fn log_list(conn: &mut SqliteConnection) -> Result<Vec<LogRow>> {
    let rows = sqlx::query(
        "SELECT id, thread_id, time, level, file_name, line_number, message
         FROM log ORDER BY id ASC",
    )
    .fetch_all(conn)
    .await?;

    let lines = rows
        .into_iter()
        .map(|row| LogRow {
            id: row.get("id"),
            thread_id: row.get("thread_id"),
            time: row.get("time"),
            level: row.get("level"),
            file_name: row.get("file_name"),
            line_number: row.get("line_number"),
            message: row.get("message"),
        })
        .collect();

    Ok(lines)
}
