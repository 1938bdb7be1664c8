//! Single-writer state coordinator.
//!
//! Executors only push events into the queue. The coordinator drains it,
//! folds every event into its private [`SystemState`] and, at most once per
//! publish interval, swaps an immutable snapshot into a `watch` slot that
//! renderers subscribe to.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, trace};

use super::SystemState;
use crate::events::{EventReceiver, TaskEvent};

/// Subscription to published snapshots.
pub type StateReceiver = watch::Receiver<Arc<SystemState>>;

/// Callback invoked with every published snapshot.
pub type StateCallback = Arc<dyn Fn(&SystemState) + Send + Sync>;

/// Default cadence for publishing snapshots.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_millis(50);

/// Most events folded in one go before the publish deadline is checked.
const MAX_DRAIN_BATCH: usize = 1024;

/// Owns the canonical [`SystemState`] for the duration of a run.
pub struct StateCoordinator {
    events: EventReceiver,
    state: SystemState,
    publisher: Arc<watch::Sender<Arc<SystemState>>>,
    publish_interval: Duration,
    on_change: Option<StateCallback>,
    dirty: bool,
    applied: u64,
    last_published: Instant,
}

impl StateCoordinator {
    /// Create a coordinator draining `events`.
    ///
    /// A zero interval is raised to one millisecond.
    pub fn new(events: EventReceiver, publish_interval: Duration) -> Self {
        let (publisher, _) = watch::channel(Arc::new(SystemState::new()));
        Self {
            events,
            state: SystemState::new(),
            publisher: Arc::new(publisher),
            publish_interval: publish_interval.max(Duration::from_millis(1)),
            on_change: None,
            dirty: false,
            applied: 0,
            last_published: Instant::now(),
        }
    }

    /// Builder: call `callback` on every published snapshot.
    pub fn with_callback(mut self, callback: StateCallback) -> Self {
        self.on_change = Some(callback);
        self
    }

    /// Builder: publish into an existing slot instead of a private one.
    pub fn with_publisher(mut self, publisher: Arc<watch::Sender<Arc<SystemState>>>) -> Self {
        self.publisher = publisher;
        self
    }

    /// Subscribe to snapshots. Can be called any number of times before `run`.
    pub fn subscribe(&self) -> StateReceiver {
        self.publisher.subscribe()
    }

    pub fn publish_interval(&self) -> Duration {
        self.publish_interval
    }

    /// Drain the queue until every producer is gone.
    ///
    /// Publishes a last snapshot after the queue closes and returns the final
    /// state.
    pub async fn run(mut self) -> SystemState {
        let mut ticker = interval(self.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = self.events.recv() => match received {
                    Some(event) => {
                        self.apply(&event);
                        self.drain_batch();
                        // Producers that never let the queue run dry must not
                        // starve the ticker.
                        if self.dirty && self.last_published.elapsed() >= self.publish_interval {
                            self.publish();
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if self.dirty {
                        self.publish();
                    }
                }
            }
        }

        self.publish();
        debug!(events = self.applied, tasks = self.state.len(), "state coordinator finished");
        self.state
    }

    fn drain_batch(&mut self) {
        for _ in 1..MAX_DRAIN_BATCH {
            match self.events.try_recv() {
                Ok(event) => self.apply(&event),
                Err(_) => break,
            }
        }
    }

    fn apply(&mut self, event: &TaskEvent) {
        trace!(task = %event.task_id(), "applying event");
        self.state.apply(event);
        self.dirty = true;
        self.applied += 1;
    }

    fn publish(&mut self) {
        let snapshot = Arc::new(self.state.clone());
        if let Some(callback) = &self.on_change {
            callback(&snapshot);
        }
        self.publisher.send_replace(snapshot);
        self.dirty = false;
        self.last_published = Instant::now();
    }
}
