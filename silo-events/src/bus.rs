//! In-process pub/sub event bus (spec §4.5).
//!
//! Listeners subscribe by event *name* (a plain `String`), not by Rust type —
//! this is the key difference from a `TypeId`-keyed bus: the ambient context
//! dispatches `"BeforeRequest"`, `"AfterRequest"`, `"AuditEvent"`, and
//! `"UnhandledException"` by name, and application code schedules its own
//! named events the same way. `dispatch` delivers as soon as the processing
//! loop's next tick picks it up; `schedule` delays delivery by a duration and
//! survives a restart via [`crate::persist`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::event::Event;
use crate::persist;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ListenerFn = Arc<dyn Fn(Event) -> BoxFuture + Send + Sync>;

const DEFAULT_MAX_CONCURRENCY: usize = 256;
const TICK_INTERVAL: StdDuration = StdDuration::from_millis(100);

/// In-process event bus. Cheap to clone — every clone shares the same
/// listener table and queues.
#[derive(Clone)]
pub struct EventBus {
    listeners: Arc<RwLock<HashMap<String, Vec<ListenerFn>>>>,
    queue: Arc<Mutex<VecDeque<Event>>>,
    scheduled: Arc<Mutex<Vec<(Event, DateTime<Utc>)>>>,
    semaphore: Arc<Semaphore>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_concurrency(DEFAULT_MAX_CONCURRENCY)
    }

    pub fn with_concurrency(max_concurrent: usize) -> Self {
        Self {
            listeners: Arc::new(RwLock::new(HashMap::new())),
            queue: Arc::new(Mutex::new(VecDeque::new())),
            scheduled: Arc::new(Mutex::new(Vec::new())),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Registers a listener for the given event name. Multiple listeners may
    /// share a name; all are notified, in registration order, when it fires.
    pub async fn register_listener<F, Fut>(&self, name: impl Into<String>, listener: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: ListenerFn = Arc::new(move |event| Box::pin(listener(event)));
        self.listeners
            .write()
            .await
            .entry(name.into())
            .or_default()
            .push(wrapped);
    }

    /// Enqueues `event` for immediate delivery on the next processing tick.
    pub async fn dispatch(&self, event: Event) {
        self.queue.lock().await.push_back(event);
    }

    /// Enqueues `event` to fire after `delay` has elapsed, surviving process
    /// restarts if the bus is run with a persistence path (§4.5).
    pub async fn schedule(&self, event: Event, delay: ChronoDuration) {
        let fire_time = Utc::now() + delay;
        self.scheduled.lock().await.push((event, fire_time));
    }

    /// Delivers `event` to its listeners immediately, bypassing the queue,
    /// and waits for every listener to finish. Used by the request pipeline
    /// for `BeforeRequest`/`AfterRequest`, where ordering relative to the
    /// request itself matters more than bus throughput (§4.7).
    pub async fn dispatch_and_wait(&self, event: Event) {
        self.notify(event).await;
    }

    /// Runs every listener registered for `event.name`, one at a time, in
    /// registration order — a later listener for the same event can rely on
    /// an earlier one having already completed its side effects.
    async fn notify(&self, event: Event) {
        let listeners = {
            let guard = self.listeners.read().await;
            guard.get(&event.name).cloned().unwrap_or_default()
        };
        if listeners.is_empty() {
            return;
        }
        for listener in listeners {
            let permit = self.semaphore.clone().acquire_owned().await;
            let outcome = tokio::spawn({
                let event = event.clone();
                async move {
                    let _permit = permit;
                    listener(event).await;
                }
            })
            .await;
            if let Err(err) = outcome {
                warn!(error = %err, "event listener panicked");
            }
        }
    }

    /// Drains any events due from the scheduled list into the immediate
    /// queue. Exposed separately from [`Self::run`] so tests can single-step
    /// the scheduler without sleeping on the real tick interval.
    pub async fn promote_due_scheduled(&self) {
        let now = Utc::now();
        let mut due = Vec::new();
        {
            let mut scheduled = self.scheduled.lock().await;
            scheduled.retain(|(event, fire_time)| {
                if *fire_time <= now {
                    due.push(event.clone());
                    false
                } else {
                    true
                }
            });
        }
        if !due.is_empty() {
            let mut queue = self.queue.lock().await;
            for event in due {
                queue.push_back(event);
            }
        }
    }

    /// A snapshot of events still waiting for their fire time. Exposed for
    /// tests and for callers that want to persist state outside of
    /// [`Self::run`]'s own shutdown handling.
    pub async fn scheduled_snapshot(&self) -> Vec<(Event, DateTime<Utc>)> {
        self.scheduled.lock().await.clone()
    }

    /// Processes exactly one immediate event if the queue is non-empty.
    pub async fn tick(&self) {
        self.promote_due_scheduled().await;
        let next = self.queue.lock().await.pop_front();
        if let Some(event) = next {
            self.notify(event).await;
        }
    }

    /// Runs the bus's background processing loop until `shutdown` is
    /// triggered: promotes due scheduled events into the queue, drains the
    /// queue, and sleeps `TICK_INTERVAL` between iterations (mirroring the
    /// original implementation's 100ms poll). On shutdown, any
    /// still-pending scheduled events are persisted to `persist_path` so
    /// they survive the restart.
    pub async fn run(&self, persist_path: PathBuf, shutdown: CancellationToken) {
        match persist::load_scheduled(&persist_path).await {
            Ok(loaded) => {
                if !loaded.is_empty() {
                    debug!(count = loaded.len(), "loaded persisted scheduled events");
                    self.scheduled.lock().await.extend(loaded);
                }
            }
            Err(err) => warn!(error = %err, "failed to load persisted scheduled events"),
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    self.tick().await;
                }
            }
        }

        let pending = self.scheduled.lock().await.clone();
        if let Err(err) = persist::save_scheduled(&persist_path, &pending).await {
            warn!(error = %err, "failed to persist scheduled events at shutdown");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dispatch_and_wait_notifies_listener_by_name() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.register_listener("UserCreated", move |_event| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.dispatch_and_wait(Event::new("UserCreated", serde_json::json!({})))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn listeners_do_not_cross_fire_on_other_names() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.register_listener("UserCreated", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.dispatch_and_wait(Event::new("UserDeleted", serde_json::json!({})))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tick_drains_one_queued_event() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.register_listener("Ping", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.dispatch(Event::new("Ping", serde_json::json!({}))).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        bus.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scheduled_event_waits_for_its_fire_time() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        bus.register_listener("Reminder", move |_| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
            }
        })
        .await;

        bus.schedule(
            Event::new("Reminder", serde_json::json!({})),
            ChronoDuration::seconds(3600),
        )
        .await;
        bus.tick().await;
        assert_eq!(
            counter.load(Ordering::SeqCst),
            0,
            "event scheduled an hour out should not fire yet"
        );

        bus.schedule(
            Event::new("Reminder", serde_json::json!({})),
            ChronoDuration::milliseconds(-1),
        )
        .await;
        bus.tick().await;
        assert_eq!(counter.load(Ordering::SeqCst), 1, "past-due event should fire");
    }

    #[tokio::test]
    async fn multiple_listeners_for_the_same_name_all_fire() {
        let bus = EventBus::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            bus.register_listener("Fanout", move |_| {
                let c = c.clone();
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        }
        bus.dispatch_and_wait(Event::new("Fanout", serde_json::json!({})))
            .await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn listeners_for_the_same_event_run_one_at_a_time_in_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        bus.register_listener("Sequenced", move |_| {
            let o = o.clone();
            async move {
                tokio::time::sleep(StdDuration::from_millis(20)).await;
                o.lock().await.push(1);
            }
        })
        .await;

        let o = order.clone();
        bus.register_listener("Sequenced", move |_| {
            let o = o.clone();
            async move {
                o.lock().await.push(2);
            }
        })
        .await;

        bus.dispatch_and_wait(Event::new("Sequenced", serde_json::json!({})))
            .await;
        assert_eq!(
            *order.lock().await,
            vec![1, 2],
            "the second listener must not run until the first has finished"
        );
    }

    #[tokio::test]
    async fn run_persists_pending_scheduled_events_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scheduled_events.json");
        let bus = EventBus::new();
        bus.schedule(
            Event::new("FarFuture", serde_json::json!({})),
            ChronoDuration::hours(1),
        )
        .await;

        let shutdown = CancellationToken::new();
        let bus2 = bus.clone();
        let shutdown2 = shutdown.clone();
        let handle = tokio::spawn(async move { bus2.run(path, shutdown2).await });
        shutdown.cancel();
        handle.await.unwrap();
    }
}
