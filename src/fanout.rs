//! Best-effort notification fan-out
//!
//! Delivery policy is at-most-once with no retry. Every registered observer has
//! its own bounded outbound queue drained by a dedicated delivery task.
//! [`FanOut::notify`] only enqueues, so it never waits on a client. A message
//! that finds an observer's queue full is dropped for that observer alone. A
//! delivery that fails or exceeds the send timeout is logged and skipped.
//!
//! The fan-out does not detect dead observers. Whoever owns the observer's
//! connection calls [`FanOut::unregister`] when it closes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::AbortHandle;
use tracing::{debug, trace, warn};

use crate::types::Notification;
use crate::{GatewayError, Result};

/// Default bound on a single delivery.
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(1);

/// Messages waiting per observer before new ones are dropped.
pub const OBSERVER_QUEUE_CAPACITY: usize = 64;

/// A live notification sink, typically one dashboard client connection.
#[async_trait::async_trait]
pub trait Observer: Send + Sync + 'static {
    async fn send(&self, message: &str) -> Result<()>;
}

#[async_trait::async_trait]
impl Observer for mpsc::Sender<String> {
    async fn send(&self, message: &str) -> Result<()> {
        mpsc::Sender::send(self, message.to_string())
            .await
            .map_err(|_| GatewayError::client_send("observer channel closed"))
    }
}

#[async_trait::async_trait]
impl Observer for mpsc::UnboundedSender<String> {
    async fn send(&self, message: &str) -> Result<()> {
        mpsc::UnboundedSender::send(self, message.to_string())
            .map_err(|_| GatewayError::client_send("observer channel closed"))
    }
}

/// Identifies a registered observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObserverId(u64);

struct Outbox {
    queue: mpsc::Sender<Arc<str>>,
    worker: AbortHandle,
}

/// The live observer set.
pub struct FanOut {
    observers: BTreeMap<ObserverId, Outbox>,
    next_id: u64,
    send_timeout: Duration,
    queue_capacity: usize,
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFY_TIMEOUT)
    }
}

impl FanOut {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            observers: BTreeMap::new(),
            next_id: 0,
            send_timeout,
            queue_capacity: OBSERVER_QUEUE_CAPACITY,
        }
    }

    /// Per-observer queue depth for observers registered from now on.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Add an observer and start its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn register(&mut self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.next_id);
        self.next_id += 1;

        let (queue, pending) = mpsc::channel(self.queue_capacity);
        let worker = tokio::spawn(deliver(id, observer, pending, self.send_timeout)).abort_handle();
        self.observers.insert(id, Outbox { queue, worker });
        debug!(observer = id.0, total = self.observers.len(), "Observer registered");
        id
    }

    /// Remove an observer, returning whether it was registered.
    ///
    /// Messages still queued for it are discarded.
    pub fn unregister(&mut self, id: ObserverId) -> bool {
        match self.observers.remove(&id) {
            Some(outbox) => {
                outbox.worker.abort();
                debug!(observer = id.0, total = self.observers.len(), "Observer unregistered");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Queue `notification` for every registered observer without waiting.
    ///
    /// Returns the number of observers it could not be queued for.
    pub fn notify(&self, notification: &Notification) -> usize {
        if self.observers.is_empty() {
            return 0;
        }
        let message: Arc<str> = match notification.to_json() {
            Ok(message) => message.into(),
            Err(e) => {
                warn!("Dropping notification: {}", e);
                return self.observers.len();
            }
        };
        trace!(recipients = self.observers.len(), %message, "Notifying observers");

        let mut failed = 0;
        for (id, outbox) in &self.observers {
            match outbox.queue.try_send(Arc::clone(&message)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    failed += 1;
                    debug!(observer = id.0, "Observer queue full, dropping notification");
                }
                Err(TrySendError::Closed(_)) => {
                    failed += 1;
                    debug!(observer = id.0, "Observer delivery task gone");
                }
            }
        }
        failed
    }
}

/// Drains one observer's queue until the [`FanOut`] drops it.
async fn deliver(
    id: ObserverId,
    observer: Arc<dyn Observer>,
    mut pending: mpsc::Receiver<Arc<str>>,
    send_timeout: Duration,
) {
    while let Some(message) = pending.recv().await {
        match tokio::time::timeout(send_timeout, observer.send(&message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(observer = id.0, "Delivery failed: {}", e),
            Err(_) => debug!(observer = id.0, "Delivery timed out"),
        }
    }
    trace!(observer = id.0, "Delivery task finished");
}
