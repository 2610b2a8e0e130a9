//! Ordered fan-out of run events to subscribers.
//!
//! Pub/sub keyed by run id. Each subscriber owns a bounded queue and
//! receives events in emission order. Delivery policy: when a queue is
//! full, non-terminal events for that subscriber are dropped and the
//! subscription is flagged degraded rather than blocking or buffering
//! without bound. Terminal events get a short bounded wait so a slow
//! subscriber still usually observes the outcome.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use runflow_types::event::{RunEvent, TokenEvent};
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 128;

/// Bounded wait when delivering a terminal event to a full queue.
const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_millis(250);

struct Subscriber {
    tx: mpsc::Sender<Arc<RunEvent>>,
    degraded: Arc<AtomicBool>,
}

/// Receiving half of one subscription to a run's events.
///
/// The subscription outlives nothing: dropping it simply detaches the
/// subscriber, and the run keeps executing.
pub struct RunSubscription {
    rx: mpsc::Receiver<Arc<RunEvent>>,
    degraded: Arc<AtomicBool>,
}

impl RunSubscription {
    /// Next event, or `None` once the run closed and the queue drained.
    pub async fn recv(&mut self) -> Option<Arc<RunEvent>> {
        self.rx.recv().await
    }

    /// True once the router dropped events because this subscriber fell
    /// behind its queue capacity.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }
}

/// Pub/sub router for run events.
#[derive(Default)]
pub struct EventRouter {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a run's events with the default queue capacity.
    pub async fn subscribe(&self, run_id: &str) -> RunSubscription {
        self.subscribe_with_capacity(run_id, DEFAULT_SUBSCRIBER_CAPACITY)
            .await
    }

    pub async fn subscribe_with_capacity(&self, run_id: &str, capacity: usize) -> RunSubscription {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let degraded = Arc::new(AtomicBool::new(false));
        let mut subscribers = self.subscribers.lock().await;
        subscribers
            .entry(run_id.to_string())
            .or_default()
            .push(Subscriber {
                tx,
                degraded: Arc::clone(&degraded),
            });
        RunSubscription { rx, degraded }
    }

    /// Publishes a token event to subscribers of its run.
    pub async fn publish_token(&self, event: TokenEvent) {
        let terminal = event.is_final;
        let run_id = event.run_id.clone();
        let event = Arc::new(RunEvent::Token(event));
        if terminal {
            self.publish_terminal(&run_id, &event).await;
        } else {
            self.publish_best_effort(&run_id, &event).await;
        }
    }

    /// Publishes a terminal error event for a run.
    pub async fn publish_error(&self, run_id: &str, message: impl Into<String>) {
        let event = Arc::new(RunEvent::Error {
            run_id: run_id.to_string(),
            message: message.into(),
        });
        self.publish_terminal(run_id, &event).await;
    }

    /// Drops all subscriptions for a run; their streams end after any
    /// already queued events drain.
    pub async fn close_run(&self, run_id: &str) {
        self.subscribers.lock().await.remove(run_id);
    }

    async fn publish_best_effort(&self, run_id: &str, event: &Arc<RunEvent>) {
        let mut subscribers = self.subscribers.lock().await;
        let Some(list) = subscribers.get_mut(run_id) else {
            return;
        };
        list.retain(|sub| match sub.tx.try_send(Arc::clone(event)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                if !sub.degraded.swap(true, Ordering::Relaxed) {
                    warn!(
                        run = run_id,
                        "subscriber queue full; dropping events and flagging degraded"
                    );
                }
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    async fn publish_terminal(&self, run_id: &str, event: &Arc<RunEvent>) {
        // Snapshot senders so bounded sends never hold the router lock.
        let targets: Vec<(mpsc::Sender<Arc<RunEvent>>, Arc<AtomicBool>)> = {
            let mut subscribers = self.subscribers.lock().await;
            let Some(list) = subscribers.get_mut(run_id) else {
                return;
            };
            list.retain(|sub| !sub.tx.is_closed());
            list.iter()
                .map(|sub| (sub.tx.clone(), Arc::clone(&sub.degraded)))
                .collect()
        };

        for (tx, degraded) in targets {
            match timeout(TERMINAL_SEND_TIMEOUT, tx.send(Arc::clone(event))).await {
                Ok(Ok(())) | Ok(Err(_)) => {}
                Err(_) => {
                    degraded.store(true, Ordering::Relaxed);
                    debug!(run = run_id, "terminal event dropped for stalled subscriber");
                }
            }
        }
    }
}
