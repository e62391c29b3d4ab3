//! Durable event log
//!
//! Events are inserted with a store-assigned id and time, trimmed once the
//! table reaches `EVENT_LOG_MAX`, and optionally mirrored to the system log.
//! Count, list and purge are one filter traversal with different terminal
//! actions, see [`MatchAction`].

use super::messages;
use super::syslog::{SyslogLevel, SyslogSink};
use super::types::{DiagnosticResult, Event, EventFilter, EventSeverity, EventType, Uid, MAX_EVENT_ARGS, MAX_EVENT_ARG_LEN};
use crate::error::{NvmError, PartialResult, Result};
use crate::settings::{ConfigStore, KEY_EVENT_LOG_MAX, KEY_EVENT_LOG_TRIM_PERCENT};
use crate::store::{self, PersistentStore, Table};
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const DEFAULT_EVENT_LOG_MAX: i64 = 10_000;
pub const DEFAULT_EVENT_LOG_TRIM_PERCENT: i64 = 10;

/// Terminal action of a filter traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchAction {
    Count,
    /// Copy matches out; more than `capacity` matches is `ArrayTooSmall`.
    Copy { capacity: usize },
    Purge,
}

#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub count: usize,
    pub events: Vec<Event>,
}

/// Run one traversal of every stored event on `conn`.
pub(crate) async fn process_matching_in(
    conn: &mut SqliteConnection,
    filter: &EventFilter,
    action: MatchAction,
) -> Result<MatchOutcome> {
    let rows = store::event_list(&mut *conn).await?;
    let mut outcome = MatchOutcome::default();

    for row in rows {
        let id = row.id;
        let event = match Event::try_from(row) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(event_id = id, error = %e, "Skipping unreadable event row");
                continue;
            }
        };
        if !filter.matches(&event) {
            continue;
        }

        outcome.count += 1;
        match action {
            MatchAction::Count => {}
            MatchAction::Purge => store::event_delete(&mut *conn, id).await?,
            MatchAction::Copy { capacity } => {
                if outcome.count > capacity {
                    return Err(NvmError::ArrayTooSmall);
                }
                let mut event = event;
                event.message = messages::render(&event);
                outcome.events.push(event);
            }
        }
    }

    Ok(outcome)
}

pub struct EventStore {
    store: Arc<PersistentStore>,
    settings: ConfigStore,
    monitor_lock: Arc<Mutex<()>>,
    syslog: Arc<dyn SyslogSink>,
    syslog_source: String,
}

impl EventStore {
    pub fn new(
        store: Arc<PersistentStore>,
        settings: ConfigStore,
        syslog: Arc<dyn SyslogSink>,
        syslog_source: impl Into<String>,
    ) -> Self {
        Self {
            store,
            settings,
            monitor_lock: Arc::new(Mutex::new(())),
            syslog,
            syslog_source: syslog_source.into(),
        }
    }

    /// Lock serializing event mutations with the notifier's poll cycle.
    pub fn monitor_lock(&self) -> Arc<Mutex<()>> {
        self.monitor_lock.clone()
    }

    pub(crate) fn persistent_store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    fn validate(event: &Event) -> Result<()> {
        if !event.event_type.is_storable() {
            return Err(NvmError::InvalidParameter);
        }
        if event.args.len() > MAX_EVENT_ARGS
            || event.args.iter().any(|a| a.len() > MAX_EVENT_ARG_LEN)
        {
            return Err(NvmError::InvalidParameter);
        }
        Ok(())
    }

    /// Persist `event`, trim the table if it is full, and mirror critical
    /// events to the system log when asked. Returns the assigned id.
    pub async fn store(&self, event: &Event, mirror_to_syslog: bool) -> Result<i64> {
        Self::validate(event)?;

        let max = self
            .settings
            .get_bounded_value_int_or(KEY_EVENT_LOG_MAX, DEFAULT_EVENT_LOG_MAX)
            .await;
        let trim_percent = self
            .settings
            .get_bounded_value_int_or(KEY_EVENT_LOG_TRIM_PERCENT, DEFAULT_EVENT_LOG_TRIM_PERCENT)
            .await;

        let mut stored = event.clone();
        stored.time = chrono::Utc::now().timestamp();

        let id = {
            let _guard = self.monitor_lock.lock().await;
            let mut tx = self.store.begin().await?;
            let id = store::event_insert(&mut tx, &stored.to_row()).await?;

            let count = store::row_count(&mut tx, Table::Event).await?;
            if count >= max {
                let limit = trim_percent * max / 100;
                let trimmed = store::event_trim_oldest(&mut tx, limit).await?;
                tracing::debug!(count, max, trimmed, "Trimmed event log");
                crate::metrics::record_events_trimmed(trimmed);
            }
            tx.commit().await?;
            id
        };

        stored.event_id = id;
        crate::metrics::record_event_stored(stored.event_type.name(), stored.severity.name());

        if mirror_to_syslog && stored.severity >= EventSeverity::Critical {
            self.log_event_in_syslog(&stored);
        }
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_by_parts(
        &self,
        event_type: EventType,
        severity: EventSeverity,
        code: u16,
        device_uid: Option<Uid>,
        action_required: bool,
        args: &[&str],
        diag_result: DiagnosticResult,
    ) -> Result<i64> {
        let mut event = Event::new(event_type, severity, code)
            .with_args(args.iter().copied())
            .action_required(action_required)
            .with_diag_result(diag_result);
        event.device_uid = device_uid;
        self.store(&event, true).await
    }

    /// Write the rendered event to the system log.
    pub fn log_event_in_syslog(&self, event: &Event) {
        let level = match event.severity {
            EventSeverity::Info => SyslogLevel::Info,
            EventSeverity::Warn => SyslogLevel::Warning,
            EventSeverity::Critical | EventSeverity::Fatal => SyslogLevel::Error,
        };
        let message = messages::render(event);
        self.syslog.write(level, &self.syslog_source, &message);
    }

    pub async fn process_matching(
        &self,
        filter: &EventFilter,
        action: MatchAction,
    ) -> Result<MatchOutcome> {
        let _guard = self.monitor_lock.lock().await;
        let mut tx = self.store.begin().await?;
        let outcome = process_matching_in(&mut tx, filter, action).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn count(&self, filter: &EventFilter) -> Result<usize> {
        Ok(self.process_matching(filter, MatchAction::Count).await?.count)
    }

    pub async fn list(&self, filter: &EventFilter, capacity: usize) -> Result<Vec<Event>> {
        let outcome = self
            .process_matching(filter, MatchAction::Copy { capacity })
            .await?;
        Ok(outcome.events)
    }

    pub async fn purge(&self, filter: &EventFilter) -> Result<usize> {
        Ok(self.process_matching(filter, MatchAction::Purge).await?.count)
    }

    /// Clear `action_required` on every matching event.
    ///
    /// Rows that vanished or no longer need action are logged; the first such
    /// problem is returned after the remaining events are processed.
    pub async fn acknowledge(&self, filter: &EventFilter) -> Result<usize> {
        let _guard = self.monitor_lock.lock().await;
        let mut tx = self.store.begin().await?;

        let count = process_matching_in(&mut tx, filter, MatchAction::Count).await?.count;
        let matched = process_matching_in(&mut tx, filter, MatchAction::Copy { capacity: count })
            .await?
            .events;

        let mut result = PartialResult::new(0usize);
        for event in matched {
            match store::event_get(&mut tx, event.event_id).await {
                Ok(Some(mut row)) if row.action_required => {
                    row.action_required = false;
                    if let Some(()) = result.take(store::event_update(&mut tx, row.id, &row).await) {
                        result.value += 1;
                    }
                }
                Ok(Some(_)) => {
                    tracing::debug!(event_id = event.event_id, "Event does not require action");
                }
                Ok(None) => {
                    tracing::warn!(event_id = event.event_id, "Event disappeared before acknowledge");
                    result.keep(NvmError::NotFound);
                }
                Err(e) => {
                    tracing::warn!(event_id = event.event_id, error = %e, "Failed to load event");
                    result.keep(e);
                }
            }
        }

        tx.commit().await?;
        result.into_result()
    }

    /// Acknowledge a single action-required event.
    pub async fn acknowledge_event(&self, event_id: i64) -> Result<()> {
        let _guard = self.monitor_lock.lock().await;
        let mut conn = self.store.acquire().await?;

        let mut row = store::event_get(&mut conn, event_id)
            .await?
            .ok_or(NvmError::InvalidParameter)?;
        if !row.action_required {
            return Err(NvmError::NotSupported);
        }
        row.action_required = false;
        store::event_update(&mut conn, event_id, &row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::syslog::TracingSyslog;
    use crate::settings::KEY_EVENT_LOG_MAX;
    use tempfile::TempDir;

    async fn create_test_events() -> (TempDir, EventStore) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(
            PersistentStore::open(dir.path().join("events.db"))
                .await
                .unwrap(),
        );
        let settings = ConfigStore::new(store.clone());
        settings.set_defaults().await.unwrap();
        let events = EventStore::new(store, settings, Arc::new(TracingSyslog), "test");
        (dir, events)
    }

    #[tokio::test]
    async fn test_store_round_trip() {
        let (_dir, events) = create_test_events().await;
        let event = Event::new(EventType::Health, EventSeverity::Warn, 204)
            .with_uid(Uid([3u8; 16]))
            .with_args(["d1", "5", "10"]);

        let id = events.store(&event, false).await.unwrap();
        let found = events
            .list(&EventFilter::new().event_id(id), 1)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].code, event.code);
        assert_eq!(found[0].severity, event.severity);
        assert_eq!(found[0].device_uid, event.device_uid);
        assert!(found[0].time > 0);
        assert!(found[0].message.contains("new 5 media errors"));
    }

    #[tokio::test]
    async fn test_filter_only_types_rejected() {
        let (_dir, events) = create_test_events().await;
        for t in [EventType::All, EventType::Diag] {
            let event = Event::new(t, EventSeverity::Info, 0);
            assert_eq!(events.store(&event, false).await, Err(NvmError::InvalidParameter));
        }
        let too_many = Event::new(EventType::Mgmt, EventSeverity::Info, 300)
            .with_args(["a", "b", "c", "d"]);
        assert_eq!(events.store(&too_many, false).await, Err(NvmError::InvalidParameter));
    }

    #[tokio::test]
    async fn test_trim_keeps_under_max_and_spares_action_required() {
        let (_dir, events) = create_test_events().await;
        events.settings.add_value(KEY_EVENT_LOG_MAX, "20").await.unwrap();

        let mut action_required_ids = Vec::new();
        for i in 0..45 {
            let required = i % 5 == 0;
            let event = Event::new(EventType::Config, EventSeverity::Info, 100)
                .action_required(required);
            let id = events.store(&event, false).await.unwrap();
            if required {
                action_required_ids.push(id);
            }

            let total = events.count(&EventFilter::all()).await.unwrap();
            assert!(total <= 20, "count {} after store {}", total, i);
        }

        for id in action_required_ids {
            let found = events.count(&EventFilter::new().event_id(id)).await.unwrap();
            assert_eq!(found, 1, "action required event {} was trimmed", id);
        }
    }

    #[tokio::test]
    async fn test_copy_reports_array_too_small() {
        let (_dir, events) = create_test_events().await;
        for _ in 0..3 {
            events
                .store(&Event::new(EventType::Mgmt, EventSeverity::Info, 306), false)
                .await
                .unwrap();
        }
        assert_eq!(
            events.list(&EventFilter::all(), 2).await,
            Err(NvmError::ArrayTooSmall)
        );
        assert_eq!(events.list(&EventFilter::all(), 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_purge_removes_matches_only() {
        let (_dir, events) = create_test_events().await;
        events
            .store(&Event::new(EventType::Mgmt, EventSeverity::Info, 306), false)
            .await
            .unwrap();
        events
            .store(&Event::new(EventType::Health, EventSeverity::Critical, 201), true)
            .await
            .unwrap();

        let purged = events
            .purge(&EventFilter::new().event_type(EventType::Mgmt))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(events.count(&EventFilter::all()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_acknowledge_clears_action_required() {
        let (_dir, events) = create_test_events().await;
        for i in 0..4 {
            let event = Event::new(EventType::Health, EventSeverity::Warn, 205)
                .action_required(i < 3);
            events.store(&event, false).await.unwrap();
        }

        let pending = EventFilter::new().action_required(true);
        assert_eq!(events.count(&pending).await.unwrap(), 3);
        assert_eq!(events.acknowledge(&pending).await.unwrap(), 3);
        assert_eq!(events.count(&pending).await.unwrap(), 0);
        assert_eq!(events.acknowledge(&pending).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_acknowledge_single_event() {
        let (_dir, events) = create_test_events().await;
        let plain = events
            .store(&Event::new(EventType::Mgmt, EventSeverity::Info, 300), false)
            .await
            .unwrap();
        let pending = events
            .store(
                &Event::new(EventType::Health, EventSeverity::Warn, 200).action_required(true),
                false,
            )
            .await
            .unwrap();

        assert_eq!(events.acknowledge_event(plain).await, Err(NvmError::NotSupported));
        assert_eq!(events.acknowledge_event(9999).await, Err(NvmError::InvalidParameter));
        events.acknowledge_event(pending).await.unwrap();
        assert_eq!(events.acknowledge_event(pending).await, Err(NvmError::NotSupported));
    }
}
