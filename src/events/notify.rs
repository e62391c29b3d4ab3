//! In-process event notification
//!
//! Subscribers register a callback for one event type (or `All`). While at
//! least one subscriber exists a background task polls the event table and
//! hands every event newer than the last seen id to the matching callbacks.
//! Callbacks run synchronously on the poll task, in event id order, so a slow
//! callback delays the rest of that cycle.

use super::store::{process_matching_in, EventStore, MatchAction};
use super::types::{Event, EventFilter, EventType};
use crate::error::{NvmError, Result};
use crate::settings::{ConfigStore, KEY_EVENT_POLLING_INTERVAL_MINUTES};
use crate::store::{self, PersistentStore};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

pub type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;
pub type SubscriptionId = u64;

pub const DEFAULT_POLLING_INTERVAL_MINUTES: i64 = 1;

#[derive(Clone)]
struct Subscription {
    event_type: EventType,
    callback: EventCallback,
}

type SubscriberTable = Arc<StdMutex<BTreeMap<SubscriptionId, Subscription>>>;

struct Poller {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

#[derive(Clone)]
struct PollContext {
    store: Arc<PersistentStore>,
    monitor_lock: Arc<Mutex<()>>,
    subscribers: SubscriberTable,
}

pub struct EventNotifier {
    ctx: PollContext,
    settings: ConfigStore,
    next_id: AtomicU64,
    max_subscribers: usize,
    minute: Duration,
    poller: Mutex<Option<Poller>>,
}

impl EventNotifier {
    /// `minute` is the wall-clock length of one polling-interval minute.
    pub fn new(
        events: &EventStore,
        settings: ConfigStore,
        max_subscribers: usize,
        minute: Duration,
    ) -> Self {
        Self {
            ctx: PollContext {
                store: events.persistent_store().clone(),
                monitor_lock: events.monitor_lock(),
                subscribers: Arc::new(StdMutex::new(BTreeMap::new())),
            },
            settings,
            next_id: AtomicU64::new(1),
            max_subscribers,
            minute,
            poller: Mutex::new(None),
        }
    }

    /// Register `callback` for events of `event_type` (`All` for every type).
    pub async fn subscribe(
        &self,
        event_type: EventType,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        let mut poller = self.poller.lock().await;

        if self.subscriber_count() >= self.max_subscribers {
            return Err(NvmError::ExceedsMaxSubscribers);
        }

        if poller.is_none() {
            *poller = Some(self.start_polling().await?);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers()
            .insert(id, Subscription { event_type, callback });
        tracing::debug!(subscription_id = id, event_type = event_type.name(), "Event subscriber added");
        Ok(id)
    }

    /// Remove a subscription. Removing the last one stops the poll task
    /// before returning.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut poller = self.poller.lock().await;

        let now_empty = {
            let mut subscribers = self.subscribers();
            if subscribers.remove(&id).is_none() {
                return Err(NvmError::BadCallback);
            }
            subscribers.is_empty()
        };

        if now_empty {
            if let Some(handle) = poller.take() {
                Self::stop_polling(handle).await;
            }
        }
        Ok(())
    }

    /// Drop every subscription and stop polling.
    pub async fn shutdown(&self) {
        let mut poller = self.poller.lock().await;
        self.subscribers().clear();
        if let Some(handle) = poller.take() {
            Self::stop_polling(handle).await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    pub async fn is_polling(&self) -> bool {
        self.poller.lock().await.is_some()
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, BTreeMap<SubscriptionId, Subscription>> {
        self.ctx
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn start_polling(&self) -> Result<Poller> {
        let baseline = {
            let mut conn = self.ctx.store.acquire().await?;
            store::event_max_id(&mut conn).await?
        };
        let minutes = self
            .settings
            .get_bounded_value_int_or(
                KEY_EVENT_POLLING_INTERVAL_MINUTES,
                DEFAULT_POLLING_INTERVAL_MINUTES,
            )
            .await
            .max(1);
        let period = self.minute.saturating_mul(u32::try_from(minutes).unwrap_or(u32::MAX));

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(self.ctx.clone(), rx, baseline, period));

        tracing::info!(baseline, period_ms = period.as_millis() as u64, "Event polling started");
        Ok(Poller { shutdown, task })
    }

    async fn stop_polling(handle: Poller) {
        let _ = handle.shutdown.send(true);
        if let Err(e) = handle.task.await {
            tracing::warn!(error = %e, "Event poll task ended abnormally");
        }
        tracing::info!("Event polling stopped");
    }
}

async fn poll_loop(
    ctx: PollContext,
    mut shutdown: watch::Receiver<bool>,
    mut last_id: i64,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = poll_once(&ctx, &mut last_id).await {
                    tracing::warn!(error = %e, "Event poll cycle failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
}

async fn poll_once(ctx: &PollContext, last_id: &mut i64) -> Result<()> {
    let _guard = ctx.monitor_lock.lock().await;
    let mut tx = ctx.store.begin().await?;

    let max_id = store::event_max_id(&mut tx).await?;
    if max_id < *last_id {
        tracing::warn!(
            last_id = *last_id,
            max_id,
            "Event ids went backwards, resynchronizing without replay"
        );
        *last_id = max_id;
    } else if max_id > *last_id {
        let outcome = process_matching_in(
            &mut tx,
            &EventFilter::all(),
            MatchAction::Copy { capacity: usize::MAX },
        )
        .await?;

        let subscribers: Vec<Subscription> = ctx
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for event in outcome.events.iter().filter(|e| e.event_id > *last_id) {
            for sub in &subscribers {
                if sub.event_type == EventType::All || sub.event_type == event.event_type {
                    if catch_unwind(AssertUnwindSafe(|| (sub.callback)(event))).is_err() {
                        tracing::warn!(event_id = event.event_id, "Event callback panicked");
                    }
                }
            }
        }
        *last_id = max_id;
    }

    tx.commit().await?;
    Ok(())
}
