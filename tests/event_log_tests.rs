/// Integration tests for events, notification, settings and the log buffer
mod common;

use common::{counter, device, MockDriver, RecordingSyslog};
use nvm_core::events::{
    Event, EventCallback, EventFilter, EventSeverity, EventType, SyslogLevel,
};
use nvm_core::settings::{KEY_EVENT_LOG_TRIM_PERCENT, KEY_LOG_LEVEL, KEY_LOG_MAX};
use nvm_core::store::{self, Table};
use nvm_core::{log_trace_f, LibConfig, LogLevel, Nvm, NvmError};
use std::io::Write;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn open_with_syslog() -> (TempDir, Nvm, Arc<RecordingSyslog>) {
    let dir = TempDir::new().unwrap();
    let mut config = LibConfig::with_store_path(dir.path().join("nvm.db"));
    config.poll_minute_ms = 20;
    let syslog = Arc::new(RecordingSyslog::default());
    let nvm = Nvm::open_with_syslog(
        config,
        Arc::new(MockDriver::new(vec![device(1)])),
        syslog.clone(),
    )
    .await
    .unwrap();
    (dir, nvm, syslog)
}

async fn log_rows(nvm: &Nvm) -> i64 {
    let mut conn = nvm.store().acquire().await.unwrap();
    store::row_count(&mut conn, Table::Log).await.unwrap()
}

#[tokio::test]
async fn test_all_subscriber_sees_every_type() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    let all = counter();
    let health_only = counter();

    let seen = all.clone();
    let all_cb: EventCallback = Arc::new(move |_: &Event| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let seen = health_only.clone();
    let health_cb: EventCallback = Arc::new(move |event: &Event| {
        assert_eq!(event.event_type, EventType::Health);
        seen.fetch_add(1, Ordering::SeqCst);
    });
    let a = nvm.add_event_notify(EventType::All, all_cb).await.unwrap();
    let h = nvm.add_event_notify(EventType::Health, health_cb).await.unwrap();

    nvm.store_event(&Event::new(EventType::Health, EventSeverity::Warn, 201), false)
        .await
        .unwrap();
    nvm.store_event(&Event::new(EventType::Config, EventSeverity::Info, 100), false)
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while all.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(all.load(Ordering::SeqCst), 2);
    assert_eq!(health_only.load(Ordering::SeqCst), 1);

    nvm.remove_event_notify(a).await.unwrap();
    nvm.remove_event_notify(h).await.unwrap();
    assert!(!nvm.notifier().is_polling().await);
    nvm.close().await.unwrap();
}

#[tokio::test]
async fn test_panicking_callback_does_not_stop_delivery() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    let hits = counter();

    let boom: EventCallback = Arc::new(|_: &Event| panic!("subscriber failure"));
    let seen = hits.clone();
    let ok: EventCallback = Arc::new(move |_: &Event| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    nvm.add_event_notify(EventType::All, boom).await.unwrap();
    nvm.add_event_notify(EventType::All, ok).await.unwrap();

    for code in [100, 101] {
        nvm.store_event(&Event::new(EventType::Config, EventSeverity::Info, code), false)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hits.load(Ordering::SeqCst) < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 2);
    nvm.close().await.unwrap();
}

async fn wait_for(hits: &Arc<std::sync::atomic::AtomicUsize>, target: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hits.load(Ordering::SeqCst) < target && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_purge_while_subscribed_resyncs_without_replay() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    let hits = counter();
    let seen = hits.clone();
    let cb: EventCallback = Arc::new(move |_: &Event| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    nvm.add_event_notify(EventType::All, cb).await.unwrap();

    for code in [200, 201, 202] {
        nvm.store_event(&Event::new(EventType::Health, EventSeverity::Warn, code), false)
            .await
            .unwrap();
    }
    wait_for(&hits, 3).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    // Max id drops to nothing; several poll cycles must not replay anything
    assert_eq!(nvm.purge_events(&EventFilter::all()).await.unwrap(), 3);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 3);

    nvm.store_event(&Event::new(EventType::Config, EventSeverity::Info, 100), false)
        .await
        .unwrap();
    wait_for(&hits, 4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 4);
    nvm.close().await.unwrap();
}

#[tokio::test]
async fn test_critical_events_mirror_to_syslog() {
    let (_dir, nvm, syslog) = open_with_syslog().await;

    nvm.store_event_by_parts(
        EventType::Health,
        EventSeverity::Critical,
        200,
        None,
        true,
        &["SN0001", "Critical"],
        Default::default(),
    )
    .await
    .unwrap();
    nvm.store_event_by_parts(
        EventType::Config,
        EventSeverity::Info,
        100,
        None,
        false,
        &[],
        Default::default(),
    )
    .await
    .unwrap();

    let lines = syslog.lines.lock().unwrap().clone();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, SyslogLevel::Error);
    assert!(lines[0].1.contains("SN0001"));
}

#[tokio::test]
async fn test_acknowledge_clears_action_required() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    let needs_ack = Event::new(EventType::Health, EventSeverity::Warn, 201).action_required(true);
    let id = nvm.store_event(&needs_ack, false).await.unwrap();
    let info = nvm
        .store_event(&Event::new(EventType::Config, EventSeverity::Info, 100), false)
        .await
        .unwrap();

    assert_eq!(nvm.acknowledge_event(info).await, Err(NvmError::NotSupported));
    assert_eq!(nvm.acknowledge_event(9999).await, Err(NvmError::InvalidParameter));

    let pending = EventFilter::new().action_required(true);
    assert_eq!(nvm.get_event_count(&pending).await.unwrap(), 1);
    nvm.acknowledge_event(id).await.unwrap();
    assert_eq!(nvm.get_event_count(&pending).await.unwrap(), 0);
}

#[tokio::test]
async fn test_purge_respects_filter() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    for code in [200, 201, 202] {
        nvm.store_event(&Event::new(EventType::Health, EventSeverity::Warn, code), false)
            .await
            .unwrap();
    }
    nvm.store_event(&Event::new(EventType::Mgmt, EventSeverity::Info, 300), false)
        .await
        .unwrap();

    let purged = nvm
        .purge_events(&EventFilter::new().event_type(EventType::Health))
        .await
        .unwrap();
    assert_eq!(purged, 3);
    assert_eq!(nvm.get_event_count(&EventFilter::all()).await.unwrap(), 1);
    assert_eq!(
        nvm.get_events(&EventFilter::all(), 0).await,
        Err(NvmError::ArrayTooSmall)
    );
}

#[tokio::test]
async fn test_config_values_are_bounded_on_read() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;

    nvm.add_config_value(KEY_EVENT_LOG_TRIM_PERCENT, "5").await.unwrap();
    assert_eq!(nvm.get_config_value(KEY_EVENT_LOG_TRIM_PERCENT).await.unwrap(), "5");
    assert_eq!(
        nvm.get_bounded_config_value_int(KEY_EVENT_LOG_TRIM_PERCENT)
            .await
            .unwrap(),
        10
    );
    assert_eq!(
        nvm.get_bounded_config_value(KEY_EVENT_LOG_TRIM_PERCENT)
            .await
            .unwrap(),
        "10"
    );

    nvm.rm_config_value(KEY_EVENT_LOG_TRIM_PERCENT).await.unwrap();
    assert_eq!(
        nvm.get_config_value(KEY_EVENT_LOG_TRIM_PERCENT).await,
        Err(NvmError::NotFound)
    );
    assert_eq!(
        nvm.get_config_value(&"k".repeat(257)).await,
        Err(NvmError::InvalidParameter)
    );
}

#[tokio::test]
async fn test_log_trace_reaches_store_after_gather() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    nvm.add_config_value(KEY_LOG_LEVEL, "2").await.unwrap();

    nvm.log_trace(LogLevel::Info, "device.rs", 10, "scan started")
        .await
        .unwrap();
    log_trace_f!(nvm, LogLevel::Warn, "pool {} at {}%", "p0", 95)
        .await
        .unwrap();
    log_trace_f!(nvm, LogLevel::Debug, "filtered {}", 1).await.unwrap();

    assert_eq!(nvm.log_gather().await.unwrap(), 2);
    assert_eq!(log_rows(&nvm).await, 2);

    let mut conn = nvm.store().acquire().await.unwrap();
    let rows = store::log_list(&mut conn).await.unwrap();
    assert!(rows.iter().any(|r| r.message == "pool p0 at 95%"));
}

#[tokio::test]
async fn test_failed_flush_keeps_side_file_and_store_untouched() {
    let (_dir, nvm, _syslog) = open_with_syslog().await;
    nvm.add_config_value(KEY_LOG_LEVEL, "3").await.unwrap();
    nvm.add_config_value(KEY_LOG_MAX, "100").await.unwrap();

    for i in 0..3 {
        nvm.log_trace(LogLevel::Info, "a.rs", i, "good line").await.unwrap();
    }

    // A record the log table rejects, written behind the buffer's back
    let path = nvm.log_buffer().path().to_path_buf();
    {
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        let oversized = "x".repeat(4096);
        writeln!(file, "1,2,2,'a.rs',4,'{}'", oversized).unwrap();
    }
    nvm.log_trace(LogLevel::Info, "a.rs", 5, "after").await.unwrap();
    let before = std::fs::read_to_string(&path).unwrap();
    assert_eq!(before.lines().count(), 5);

    assert!(nvm.log_gather().await.is_err());
    assert_eq!(log_rows(&nvm).await, 0);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);
}

#[tokio::test]
async fn test_close_flushes_pending_lines() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nvm.db");
    {
        let nvm = Nvm::create(
            LibConfig::with_store_path(&db),
            Arc::new(MockDriver::new(Vec::new())),
        )
        .await
        .unwrap();
        nvm.add_config_value(KEY_LOG_LEVEL, "0").await.unwrap();
        nvm.log_trace(LogLevel::Error, "x.rs", 1, "fatal").await.unwrap();
        nvm.close().await.unwrap();
        let pending = std::fs::read_to_string(nvm.log_buffer().path()).unwrap();
        assert!(pending.is_empty());
    }

    let nvm = Nvm::open(
        LibConfig::with_store_path(&db),
        Arc::new(MockDriver::new(Vec::new())),
    )
    .await
    .unwrap();
    assert_eq!(log_rows(&nvm).await, 1);
    // Settings survive reopen and are not reseeded
    assert_eq!(nvm.get_config_value(KEY_LOG_LEVEL).await.unwrap(), "0");
}

#[tokio::test]
async fn test_create_discards_stale_side_file() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("nvm.db");
    let mut side = db.as_os_str().to_owned();
    side.push(".log");
    std::fs::write(&side, "1,100,0,'old.rs',1,'left over'\n").unwrap();

    let nvm = Nvm::create(
        LibConfig::with_store_path(&db),
        Arc::new(MockDriver::new(Vec::new())),
    )
    .await
    .unwrap();
    assert!(!nvm.log_buffer().path().exists());
    assert_eq!(nvm.log_gather().await.unwrap(), 0);
    assert_eq!(log_rows(&nvm).await, 0);
}
