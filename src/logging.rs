//! Write-behind log buffer
//!
//! Log lines are appended to a side file next to the store (`<store>.log`)
//! and periodically drained into the durable `log` table:
//! - append and flush share one lock, plus an advisory file lock for other processes
//! - a flush is all-or-nothing: any insert failure rolls back and keeps the side file
//! - a successful flush truncates the side file in place under the file lock
//! - the `log` table is rolled to the newest `LOG_MAX` rows during every flush
//!
//! [`LogBufferLayer`] bridges `tracing` events into the buffer.

use crate::error::{NvmError, Result};
use crate::events::syslog::{SyslogLevel, SyslogSink, SYSLOG_TARGET};
use crate::settings::{ConfigStore, KEY_LOG_DESTINATION, KEY_LOG_LEVEL, KEY_LOG_MAX};
use crate::store::{self, LogRow, PersistentStore};
use fs2::FileExt;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::future::Future;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{Event, Subscriber};
use tracing_subscriber::{layer::Context, registry::LookupSpan, Layer};

/// Rows kept in the `log` table when `LOG_MAX` is unset.
pub const DEFAULT_LOG_MAX: i64 = 10_000;
pub const MAX_FILE_NAME_LEN: usize = 1024;
pub const MAX_MESSAGE_LEN: usize = 2048;

pub const LOG_DESTINATION_STORE: i64 = 0;
pub const LOG_DESTINATION_SYSLOG: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl LogLevel {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(LogLevel::Error),
            1 => Some(LogLevel::Warn),
            2 => Some(LogLevel::Info),
            3 => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::ERROR => LogLevel::Error,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::INFO => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub thread_id: u64,
    pub time: u64,
    pub level: LogLevel,
    pub file_name: String,
    pub line_number: u32,
    pub message: String,
}

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Small process-unique id of the calling thread.
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

impl LogLine {
    /// Line stamped with the calling thread and the current time.
    pub fn new(level: LogLevel, file_name: &str, line_number: u32, message: &str) -> Self {
        Self {
            thread_id: current_thread_id(),
            time: chrono::Utc::now().timestamp().max(0) as u64,
            level,
            file_name: truncate_chars(file_name, MAX_FILE_NAME_LEN),
            line_number,
            message: truncate_chars(message, MAX_MESSAGE_LEN),
        }
    }

    fn to_row(&self) -> LogRow {
        LogRow {
            id: 0,
            thread_id: self.thread_id as i64,
            time: self.time as i64,
            level: self.level as i64,
            file_name: self.file_name.clone(),
            line_number: self.line_number as i64,
            message: self.message.clone(),
        }
    }
}

fn quote(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('\'');
    for c in text.chars() {
        match c {
            '\'' => out.push_str("''"),
            '\n' | '\r' => out.push(' '),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Side file record: `thread_id,time,level,'file_name',line_number,'message'`.
pub fn encode_line(line: &LogLine) -> String {
    format!(
        "{},{},{},{},{},{}\n",
        line.thread_id,
        line.time,
        line.level as i64,
        quote(&line.file_name),
        line.line_number,
        quote(&line.message)
    )
}

fn split_fields(raw: &str) -> Option<Vec<String>> {
    let mut fields = Vec::new();
    let mut chars = raw.chars().peekable();

    loop {
        let mut field = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            loop {
                match chars.next()? {
                    '\'' if chars.peek() == Some(&'\'') => {
                        chars.next();
                        field.push('\'');
                    }
                    '\'' => break,
                    c => field.push(c),
                }
            }
            fields.push(field);
            match chars.next() {
                None => return Some(fields),
                Some(',') => continue,
                Some(_) => return None,
            }
        }

        loop {
            match chars.next() {
                None => {
                    fields.push(field);
                    return Some(fields);
                }
                Some(',') => break,
                Some(c) => field.push(c),
            }
        }
        fields.push(field);
    }
}

/// Parse one side file record. Malformed records yield `None`.
pub fn parse_line(raw: &str) -> Option<LogLine> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    let fields = split_fields(raw)?;
    if fields.len() != 6 {
        return None;
    }

    Some(LogLine {
        thread_id: fields[0].trim().parse().ok()?,
        time: fields[1].trim().parse().ok()?,
        level: LogLevel::from_i64(fields[2].trim().parse().ok()?)?,
        file_name: fields[3].clone(),
        line_number: fields[4].trim().parse().ok()?,
        message: fields[5].clone(),
    })
}

pub struct LogBuffer {
    store: Arc<PersistentStore>,
    settings: ConfigStore,
    path: PathBuf,
    lock: Mutex<()>,
    open: AtomicBool,
    cache_max_bytes: u64,
    syslog: Arc<dyn SyslogSink>,
    syslog_source: String,
}

impl LogBuffer {
    pub fn open(
        store: Arc<PersistentStore>,
        settings: ConfigStore,
        syslog: Arc<dyn SyslogSink>,
        syslog_source: impl Into<String>,
        cache_max_bytes: u64,
    ) -> Self {
        let path = store.log_path();
        Self {
            store,
            settings,
            path,
            lock: Mutex::new(()),
            open: AtomicBool::new(true),
            cache_max_bytes,
            syslog,
            syslog_source: syslog_source.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(NvmError::Unknown)
        }
    }

    /// Append one record to the side file, flushing when the file grows too large.
    pub async fn append(
        &self,
        level: LogLevel,
        file_name: &str,
        line_number: u32,
        message: &str,
    ) -> Result<()> {
        self.append_line(&LogLine::new(level, file_name, line_number, message))
            .await
    }

    /// Append `line` to the side file.
    ///
    /// Once the line is on disk the append has succeeded. A flush triggered by
    /// the file outgrowing its threshold is best-effort: its failure is logged
    /// and the lines stay in the side file for the next flush.
    pub async fn append_line(&self, line: &LogLine) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;

        let path = self.path.clone();
        let record = encode_line(line);
        let size = tokio::task::spawn_blocking(move || -> std::io::Result<u64> {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            file.lock_exclusive()?;
            let written = file.write_all(record.as_bytes());
            let size = file.metadata().map(|m| m.len());
            file.unlock()?;
            written?;
            size
        })
        .await??;

        if size > self.cache_max_bytes {
            tracing::debug!(size, "Side log file over threshold, flushing");
            if let Err(e) = self.flush_locked().await {
                tracing::warn!(size, error = %e, "Threshold flush failed, lines kept in side file");
            }
        }
        Ok(())
    }

    /// Drain the side file into the `log` table. Returns the rows inserted.
    pub async fn flush(&self) -> Result<usize> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;
        self.flush_locked().await
    }

    async fn flush_locked(&self) -> Result<usize> {
        let path = self.path.clone();
        let opened = tokio::task::spawn_blocking(move || -> std::io::Result<Option<(File, Vec<u8>)>> {
            let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e),
            };
            file.lock_exclusive()?;
            let mut bytes = Vec::new();
            if let Err(e) = file.read_to_end(&mut bytes) {
                file.unlock()?;
                return Err(e);
            }
            Ok(Some((file, bytes)))
        })
        .await??;
        let Some((file, bytes)) = opened else {
            return Ok(0);
        };

        let outcome = self.drain(&bytes).await;

        // truncate in place under the lock, never unlink
        let drained = outcome.is_ok();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let truncated = if drained { file.set_len(0) } else { Ok(()) };
            file.unlock()?;
            truncated
        })
        .await??;

        let inserted = outcome?;
        crate::metrics::record_log_lines_flushed(inserted as u64);
        Ok(inserted)
    }

    /// Insert every record of `bytes` in one transaction, rolling the table
    /// as it grows. Nothing is committed unless every insert succeeds.
    async fn drain(&self, bytes: &[u8]) -> Result<usize> {
        let contents = String::from_utf8_lossy(bytes);
        let max = self.log_max().await;
        let mut tx = self.store.begin().await?;
        let mut inserted = 0usize;
        let mut first_error = None;

        for raw in contents.lines() {
            let Some(line) = parse_line(raw) else {
                tracing::debug!(record = raw, "Skipping malformed side log record");
                continue;
            };
            if let Err(e) = store::log_insert(&mut tx, &line.to_row()).await {
                first_error = Some(e);
                break;
            }
            inserted += 1;
            if max > 0 && inserted % max as usize == 0 {
                if let Err(e) = store::log_roll(&mut tx, max).await {
                    first_error = Some(e);
                    break;
                }
            }
        }

        if first_error.is_none() && max > 0 {
            if let Err(e) = store::log_roll(&mut tx, max).await {
                first_error = Some(e);
            }
        }

        if let Some(err) = first_error {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Log flush rollback failed");
            }
            tracing::warn!(error = %err, "Log flush aborted, side file kept for retry");
            return Err(err);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn log_max(&self) -> i64 {
        self.settings
            .get_bounded_value_int_or(KEY_LOG_MAX, DEFAULT_LOG_MAX)
            .await
    }

    /// Trim the `log` table to the newest `LOG_MAX` rows.
    pub async fn roll(&self) -> Result<()> {
        self.ensure_open()?;
        let _guard = self.lock.lock().await;
        let max = self.log_max().await;
        if max > 0 {
            let mut conn = self.store.acquire().await?;
            store::log_roll(&mut conn, max).await?;
        }
        Ok(())
    }

    /// Current log level; `None` means logging is disabled.
    pub async fn current_log_level(&self) -> Option<LogLevel> {
        let value = self.settings.get_value_int(KEY_LOG_LEVEL).await.ok()?;
        LogLevel::from_i64(value)
    }

    pub async fn set_current_log_level(&self, level: LogLevel) -> Result<()> {
        self.settings
            .add_value(KEY_LOG_LEVEL, &(level as i64).to_string())
            .await
    }

    /// Record `line` if its level is enabled, to the side file or the system log.
    pub async fn log_line(&self, line: LogLine) -> Result<()> {
        match self.current_log_level().await {
            Some(current) if line.level <= current => {}
            _ => return Ok(()),
        }

        let destination = self
            .settings
            .get_value_int(KEY_LOG_DESTINATION)
            .await
            .unwrap_or(LOG_DESTINATION_STORE);

        if destination == LOG_DESTINATION_SYSLOG {
            if line.level == LogLevel::Error {
                let text = format!("{} [{}] - {}", line.file_name, line.line_number, line.message);
                self.syslog
                    .write(SyslogLevel::Error, &self.syslog_source, &text);
            }
            return Ok(());
        }

        self.append_line(&line).await
    }

    pub async fn log_trace(
        &self,
        level: LogLevel,
        file_name: &str,
        line_number: u32,
        message: &str,
    ) -> Result<()> {
        self.log_line(LogLine::new(level, file_name, line_number, message))
            .await
    }

    /// Formatting variant of [`log_trace`](Self::log_trace).
    pub fn log_trace_f(
        &self,
        level: LogLevel,
        file_name: &str,
        line_number: u32,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = Result<()>> + '_ {
        let line = LogLine::new(level, file_name, line_number, &fmt::format(args));
        self.log_line(line)
    }

    /// Force the side file into the store.
    pub async fn log_gather(&self) -> Result<usize> {
        self.flush().await
    }

    /// Flush what is pending and refuse further writes.
    pub async fn close(&self) -> Result<()> {
        let result = self.flush().await.map(|_| ());
        self.open.store(false, Ordering::Release);
        result
    }
}

/// `log_trace_f!(buffer, LogLevel::Warn, "pool {} is {}", id, state)`
#[macro_export]
macro_rules! log_trace_f {
    ($buffer:expr, $level:expr, $($arg:tt)+) => {
        $buffer.log_trace_f($level, file!(), line!(), format_args!($($arg)+))
    };
}

const IGNORED_TARGETS: [&str; 4] = [module_path!(), SYSLOG_TARGET, "nvm_core::error", "sqlx"];

/// Tracing layer that forwards events into a [`LogBuffer`].
///
/// Events are handed to a background task over a channel so the emitting
/// thread never waits on file or store I/O.
pub struct LogBufferLayer {
    sender: mpsc::UnboundedSender<LogLine>,
}

impl LogBufferLayer {
    /// Spawn the writer task. Must be called inside a tokio runtime.
    pub fn spawn(buffer: Arc<LogBuffer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogLine>();

        tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if !buffer.is_open() {
                    break;
                }
                if let Err(e) = buffer.log_line(line).await {
                    tracing::debug!(error = %e, "Dropping log line");
                }
            }
        });

        Self { sender: tx }
    }
}

impl<S> Layer<S> for LogBufferLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let target = metadata.target();
        if IGNORED_TARGETS.iter().any(|t| target.starts_with(t)) {
            return;
        }

        struct FieldVisitor {
            message: Option<String>,
            fields: serde_json::Map<String, serde_json::Value>,
        }

        impl tracing::field::Visit for FieldVisitor {
            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
                let value_str = format!("{:?}", value);
                if field.name() == "message" {
                    self.message = Some(value_str.trim_matches('"').to_string());
                } else {
                    self.fields.insert(
                        field.name().to_string(),
                        serde_json::Value::String(value_str),
                    );
                }
            }

            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                if field.name() == "message" {
                    self.message = Some(value.to_string());
                } else {
                    self.fields.insert(
                        field.name().to_string(),
                        serde_json::Value::String(value.to_string()),
                    );
                }
            }
        }

        let mut visitor = FieldVisitor {
            message: None,
            fields: serde_json::Map::new(),
        };
        event.record(&mut visitor);

        let mut message = visitor.message.unwrap_or_default();
        if !visitor.fields.is_empty() {
            message.push(' ');
            message.push_str(&serde_json::Value::Object(visitor.fields).to_string());
        }

        let line = LogLine::new(
            metadata.level().into(),
            metadata.file().unwrap_or(target),
            metadata.line().unwrap_or(0),
            &message,
        );
        let _ = self.sender.send(line);
    }
}
