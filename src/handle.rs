//! Handle onto a running gateway core
//!
//! The core task owns the fleet and the observer set. Everything else reaches
//! it through a [`GatewayHandle`], whose requests are served between frames so
//! they always see fully applied state.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::fanout::{Observer, ObserverId};
use crate::protocol::ProtocolPayload;
use crate::types::DeviceSnapshot;
use crate::{GatewayError, Result};

/// Capacity of the request channel into the core.
pub(crate) const COMMAND_CAPACITY: usize = 64;

/// What happened to an outbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Framed and handed to the transport writer
    Written,
    /// Destination is not part of the fleet, nothing was written
    Discarded,
}

pub(crate) enum Command {
    Send { payload: ProtocolPayload, reply: oneshot::Sender<Result<SendOutcome>> },
    Snapshot { reply: oneshot::Sender<Vec<DeviceSnapshot>> },
    Register { observer: Arc<dyn Observer>, reply: oneshot::Sender<ObserverId> },
    Unregister { id: ObserverId, reply: oneshot::Sender<bool> },
}

/// Cloneable request path into the gateway core.
///
/// Every method fails with [`GatewayError::Stopped`] once the run has ended.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    tx: mpsc::Sender<Command>,
}

impl GatewayHandle {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        (Self { tx }, rx)
    }

    /// Send a payload to a robot.
    ///
    /// Payloads addressed to robots outside the fleet are discarded without
    /// error. A failed write is fatal and also ends the run.
    pub async fn send(&self, payload: ProtocolPayload) -> Result<SendOutcome> {
        self.request(|reply| Command::Send { payload, reply }).await?
    }

    /// Current fleet, sorted by address.
    pub async fn snapshot(&self) -> Result<Vec<DeviceSnapshot>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Add an observer to the notification fan-out.
    pub async fn register_observer(&self, observer: Arc<dyn Observer>) -> Result<ObserverId> {
        self.request(|reply| Command::Register { observer, reply }).await
    }

    /// Remove an observer, typically when its client disconnects.
    pub async fn unregister_observer(&self, id: ObserverId) -> Result<bool> {
        self.request(|reply| Command::Unregister { id, reply }).await
    }

    /// Whether the core has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx.send(build(reply)).await.map_err(|_| GatewayError::Stopped)?;
        response.await.map_err(|_| GatewayError::Stopped)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send { payload, .. } => f.debug_struct("Send").field("payload", payload).finish(),
            Command::Snapshot { .. } => f.write_str("Snapshot"),
            Command::Register { .. } => f.write_str("Register"),
            Command::Unregister { id, .. } => {
                f.debug_struct("Unregister").field("id", id).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn requests_fail_once_core_is_gone() {
        let (handle, rx) = GatewayHandle::channel();
        drop(rx);
        assert!(handle.is_closed());
        assert!(matches!(handle.snapshot().await, Err(GatewayError::Stopped)));
    }

    #[tokio::test]
    async fn dropped_reply_reports_stopped() {
        let (handle, mut rx) = GatewayHandle::channel();
        let core = tokio::spawn(async move {
            // Receive the request and drop it unanswered
            let command = rx.recv().await;
            assert!(matches!(command, Some(Command::Snapshot { .. })));
        });
        assert!(matches!(handle.snapshot().await, Err(GatewayError::Stopped)));
        core.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_core() {
        let (handle, mut rx) = GatewayHandle::channel();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                if let Command::Snapshot { reply } = command {
                    let _ = reply.send(Vec::new());
                }
            }
        });
        assert_eq!(handle.snapshot().await.unwrap(), Vec::new());
    }
}
