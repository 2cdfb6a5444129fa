//! Transport trait for the serial link
//!
//! A transport is a push-style byte source plus a frame writer. Reading is
//! blocking and runs on a dedicated OS thread owned by the orchestrator; every
//! received byte is pushed into a [`ByteSink`] that hands it across to the
//! async side in arrival order.

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{GatewayError, Result};

/// Default capacity of the bounded ingest queue, in chunks.
pub const DEFAULT_INGEST_CAPACITY: usize = 4096;

/// Serial link to the gateway board.
pub trait Transport: Send + 'static {
    /// Push received bytes into `sink` until the stream ends.
    ///
    /// Called once, on a dedicated thread. Blocking is expected.
    ///
    /// Returns:
    /// - `Ok(())` - Stream ended normally (e.g. end of a recording)
    /// - `Err(e)` - Fatal I/O error, the link is gone
    fn read_loop(&mut self, sink: &ByteSink) -> Result<()>;

    /// Writer for outbound frames, usable while `read_loop` runs.
    fn writer(&mut self) -> Result<Box<dyn FrameWriter>>;
}

/// Accepts one fully framed and encoded byte sequence at a time.
pub trait FrameWriter: Send + 'static {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;
}

/// How bytes are queued between the reader thread and the ingestion task.
///
/// `Bounded` blocks the reader thread when the ingestion task falls behind,
/// applying backpressure to the link. `Unbounded` never blocks and relies on
/// the link's physical byte rate to bound memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum IngestQueue {
    Bounded { capacity: usize },
    Unbounded,
}

impl Default for IngestQueue {
    fn default() -> Self {
        IngestQueue::Bounded { capacity: DEFAULT_INGEST_CAPACITY }
    }
}

impl IngestQueue {
    /// Create the producer and consumer halves of the queue.
    pub fn channel(self) -> (ByteSink, ByteQueue) {
        match self {
            IngestQueue::Bounded { capacity } => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (ByteSink::Bounded(tx), ByteQueue::Bounded(rx))
            }
            IngestQueue::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (ByteSink::Unbounded(tx), ByteQueue::Unbounded(rx))
            }
        }
    }
}

/// Producer half of the ingest queue, used from the reader thread.
#[derive(Debug, Clone)]
pub enum ByteSink {
    Bounded(mpsc::Sender<Vec<u8>>),
    Unbounded(mpsc::UnboundedSender<Vec<u8>>),
}

impl ByteSink {
    /// Hand received bytes to the ingestion task.
    ///
    /// Blocks while a bounded queue is full, so it must not be called from
    /// inside the async runtime. Fails once the ingestion side has shut down.
    pub fn push(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let sent = match self {
            ByteSink::Bounded(tx) => tx.blocking_send(bytes.to_vec()).is_ok(),
            ByteSink::Unbounded(tx) => tx.send(bytes.to_vec()).is_ok(),
        };
        if sent {
            Ok(())
        } else {
            Err(GatewayError::transport_fatal("ingestion stopped"))
        }
    }

    /// Whether the ingestion side is gone.
    pub fn is_closed(&self) -> bool {
        match self {
            ByteSink::Bounded(tx) => tx.is_closed(),
            ByteSink::Unbounded(tx) => tx.is_closed(),
        }
    }
}

/// Consumer half of the ingest queue, owned by the ingestion task.
#[derive(Debug)]
pub enum ByteQueue {
    Bounded(mpsc::Receiver<Vec<u8>>),
    Unbounded(mpsc::UnboundedReceiver<Vec<u8>>),
}

impl ByteQueue {
    /// Next chunk in arrival order, `None` once every sink is dropped.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        match self {
            ByteQueue::Bounded(rx) => rx.recv().await,
            ByteQueue::Unbounded(rx) => rx.recv().await,
        }
    }
}
