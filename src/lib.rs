pub mod config;
pub mod context;
pub mod device;
pub mod driver;
pub mod error;
pub mod events;
pub mod logging;
pub mod metrics;
pub mod namespace;
pub mod settings;
pub mod store;
pub mod types;

pub use config::LibConfig;
pub use context::ProcessContext;
pub use device::DeviceManager;
pub use driver::{FwCommand, FwStatus, NvmDriver};
pub use error::{describe_return_code, NvmError, PartialResult, Result};
pub use logging::{LogBuffer, LogBufferLayer, LogLevel};
pub use namespace::NamespaceManager;
pub use settings::ConfigStore;
pub use store::PersistentStore;

use events::{
    syslog, DiagnosticResult, Event, EventCallback, EventFilter, EventNotifier, EventSeverity,
    EventStore, EventType, SubscriptionId, SyslogSink, Uid,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt as tracing_fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// Note: This function can only be called once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_target(true))
        .init();
}

/// Initialize tracing with the console layer plus a bridge into `buffer`.
///
/// Must be called inside a tokio runtime. If a global subscriber is already
/// installed the bridge is not added and a warning goes to stderr.
pub fn init_tracing_with_log_buffer(buffer: Arc<LogBuffer>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_fmt::layer().with_target(true))
        .with(LogBufferLayer::spawn(buffer));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: Failed to add log buffer layer: {}", e);
    }
}

/// Application handle owning every component of the library.
///
/// One instance per process is the expected discipline; nothing here is
/// global, so tests can run several side by side against separate stores.
pub struct Nvm {
    config: LibConfig,
    driver: Arc<dyn NvmDriver>,
    store: Arc<PersistentStore>,
    settings: ConfigStore,
    log: Arc<LogBuffer>,
    events: Arc<EventStore>,
    notifier: EventNotifier,
    context: Arc<ProcessContext>,
    devices: DeviceManager,
    namespaces: NamespaceManager,
}

impl Nvm {
    /// Open (or create) the store at the configured location.
    pub async fn open(config: LibConfig, driver: Arc<dyn NvmDriver>) -> Result<Self> {
        Self::open_with_syslog(config, driver, syslog::default_sink()).await
    }

    pub async fn open_with_syslog(
        config: LibConfig,
        driver: Arc<dyn NvmDriver>,
        syslog: Arc<dyn SyslogSink>,
    ) -> Result<Self> {
        let store = PersistentStore::open(config.resolve_store_path()).await?;
        Self::assemble(config, driver, syslog, store).await
    }

    /// Recreate the store from scratch, seeded with the default settings.
    pub async fn create(config: LibConfig, driver: Arc<dyn NvmDriver>) -> Result<Self> {
        let store = PersistentStore::create(config.resolve_store_path()).await?;
        Self::assemble(config, driver, syslog::default_sink(), store).await
    }

    async fn assemble(
        config: LibConfig,
        driver: Arc<dyn NvmDriver>,
        syslog: Arc<dyn SyslogSink>,
        store: PersistentStore,
    ) -> Result<Self> {
        metrics::init_metric_descriptions();

        let store = Arc::new(store);
        let settings = ConfigStore::new(store.clone());
        let seeded = {
            let mut conn = store.acquire().await?;
            crate::store::row_count(&mut conn, crate::store::Table::Config).await? > 0
        };
        if !seeded {
            settings.set_defaults().await?;
        }

        let log = Arc::new(LogBuffer::open(
            store.clone(),
            settings.clone(),
            syslog.clone(),
            config.syslog_source.clone(),
            config.log_cache_max_bytes,
        ));
        let events = Arc::new(EventStore::new(
            store.clone(),
            settings.clone(),
            syslog,
            config.syslog_source.clone(),
        ));
        let notifier = EventNotifier::new(
            &events,
            settings.clone(),
            config.max_event_subscribers,
            Duration::from_millis(config.poll_minute_ms.max(1)),
        );
        let context = Arc::new(ProcessContext::new());
        let devices = DeviceManager::new(driver.clone(), context.clone(), events.clone());
        let namespaces = NamespaceManager::new(driver.clone(), context.clone(), events.clone());

        tracing::info!(path = %store.path().display(), "NVM library opened");

        Ok(Self {
            config,
            driver,
            store,
            settings,
            log,
            events,
            notifier,
            context,
            devices,
            namespaces,
        })
    }

    pub fn config(&self) -> &LibConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn settings(&self) -> &ConfigStore {
        &self.settings
    }

    pub fn log_buffer(&self) -> &Arc<LogBuffer> {
        &self.log
    }

    pub fn event_store(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn notifier(&self) -> &EventNotifier {
        &self.notifier
    }

    pub fn context(&self) -> &Arc<ProcessContext> {
        &self.context
    }

    pub fn devices(&self) -> &DeviceManager {
        &self.devices
    }

    pub fn namespaces(&self) -> &NamespaceManager {
        &self.namespaces
    }

    fn require_admin(&self) -> Result<()> {
        device::require_admin(self.driver.as_ref())
    }

    // Context

    pub fn create_context(&self) {
        self.context.create();
    }

    pub fn free_context(&self) {
        self.context.destroy();
    }

    // Logging

    pub async fn log_trace(
        &self,
        level: LogLevel,
        file_name: &str,
        line_number: u32,
        message: &str,
    ) -> Result<()> {
        self.log.log_trace(level, file_name, line_number, message).await
    }

    /// Formatting variant of [`log_trace`](Self::log_trace); see [`log_trace_f!`].
    pub fn log_trace_f(
        &self,
        level: LogLevel,
        file_name: &str,
        line_number: u32,
        args: fmt::Arguments<'_>,
    ) -> impl Future<Output = Result<()>> + '_ {
        self.log.log_trace_f(level, file_name, line_number, args)
    }

    pub async fn get_current_log_level(&self) -> Option<LogLevel> {
        self.log.current_log_level().await
    }

    pub async fn set_current_log_level(&self, level: LogLevel) -> Result<()> {
        self.require_admin()?;
        self.log.set_current_log_level(level).await
    }

    /// Move pending log lines into the store; returns how many were moved.
    pub async fn log_gather(&self) -> Result<usize> {
        self.log.log_gather().await
    }

    // Configuration

    pub async fn get_config_value(&self, key: &str) -> Result<String> {
        self.settings.get_value(key).await
    }

    pub async fn get_config_value_int(&self, key: &str) -> Result<i64> {
        self.settings.get_value_int(key).await
    }

    pub async fn get_bounded_config_value(&self, key: &str) -> Result<String> {
        self.settings.get_bounded_value(key).await
    }

    pub async fn get_bounded_config_value_int(&self, key: &str) -> Result<i64> {
        self.settings.get_bounded_value_int(key).await
    }

    pub async fn add_config_value(&self, key: &str, value: &str) -> Result<()> {
        self.require_admin()?;
        self.settings.add_value(key, value).await
    }

    pub async fn rm_config_value(&self, key: &str) -> Result<()> {
        self.require_admin()?;
        self.settings.remove_value(key).await
    }

    // Events

    pub async fn store_event(&self, event: &Event, mirror_to_syslog: bool) -> Result<i64> {
        self.events.store(event, mirror_to_syslog).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_event_by_parts(
        &self,
        event_type: EventType,
        severity: EventSeverity,
        code: u16,
        device_uid: Option<Uid>,
        action_required: bool,
        args: &[&str],
        diag_result: DiagnosticResult,
    ) -> Result<i64> {
        self.events
            .store_by_parts(
                event_type,
                severity,
                code,
                device_uid,
                action_required,
                args,
                diag_result,
            )
            .await
    }

    pub fn log_event_in_syslog(&self, event: &Event) {
        self.events.log_event_in_syslog(event);
    }

    pub async fn get_event_count(&self, filter: &EventFilter) -> Result<usize> {
        self.require_admin()?;
        self.events.count(filter).await
    }

    pub async fn get_events(&self, filter: &EventFilter, capacity: usize) -> Result<Vec<Event>> {
        self.require_admin()?;
        self.events.list(filter, capacity).await
    }

    pub async fn purge_events(&self, filter: &EventFilter) -> Result<usize> {
        self.require_admin()?;
        self.events.purge(filter).await
    }

    pub async fn acknowledge_events(&self, filter: &EventFilter) -> Result<usize> {
        self.require_admin()?;
        self.events.acknowledge(filter).await
    }

    pub async fn acknowledge_event(&self, event_id: i64) -> Result<()> {
        self.require_admin()?;
        self.events.acknowledge_event(event_id).await
    }

    // Notification

    pub async fn add_event_notify(
        &self,
        event_type: EventType,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        self.notifier.subscribe(event_type, callback).await
    }

    pub async fn remove_event_notify(&self, id: SubscriptionId) -> Result<()> {
        self.notifier.unsubscribe(id).await
    }

    /// Stop polling, flush pending log lines and close the store.
    pub async fn close(&self) -> Result<()> {
        self.notifier.shutdown().await;
        let flushed = self.log.close().await;
        self.context.destroy();
        self.store.close().await;
        tracing::info!("NVM library closed");
        flushed
    }
}
