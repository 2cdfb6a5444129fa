//! In-memory transport

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

use crate::transport::{ByteSink, FrameWriter, Transport};
use crate::{GatewayError, Result};

/// How often an idle reader checks whether ingestion has shut down.
const IDLE_POLL: Duration = Duration::from_millis(20);

enum Feed {
    Bytes(Vec<u8>),
    Fail(String),
}

/// Sends bytes into a [`MemoryTransport`] as if they arrived over the link.
///
/// Dropping every feeder ends the stream.
#[derive(Clone)]
pub struct LinkFeeder {
    tx: mpsc::Sender<Feed>,
}

impl LinkFeeder {
    /// Deliver bytes to the gateway. Returns false once the reader is gone.
    pub fn send(&self, bytes: impl Into<Vec<u8>>) -> bool {
        self.tx.send(Feed::Bytes(bytes.into())).is_ok()
    }

    /// Simulate the link dropping: the reader fails with a fatal error.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Feed::Fail(reason.into())).is_ok()
    }
}

/// Frames written by the gateway, shared with the test or simulation.
#[derive(Debug, Clone, Default)]
pub struct WrittenFrames {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl WrittenFrames {
    /// Copy of every frame written so far, oldest first.
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().map(|frames| frames.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.frames.lock().map(|frames| frames.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Transport whose inbound bytes come from a [`LinkFeeder`] and whose
/// outbound frames are collected in [`WrittenFrames`].
pub struct MemoryTransport {
    rx: Option<mpsc::Receiver<Feed>>,
    written: WrittenFrames,
}

impl MemoryTransport {
    pub fn new() -> (Self, LinkFeeder) {
        let (tx, rx) = mpsc::channel();
        (Self { rx: Some(rx), written: WrittenFrames::default() }, LinkFeeder { tx })
    }

    /// Handle on the frames the gateway writes.
    pub fn written(&self) -> WrittenFrames {
        self.written.clone()
    }
}

impl Transport for MemoryTransport {
    fn read_loop(&mut self, sink: &ByteSink) -> Result<()> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| GatewayError::transport_fatal("memory transport already started"))?;

        loop {
            match rx.recv_timeout(IDLE_POLL) {
                Ok(Feed::Bytes(bytes)) => {
                    trace!(len = bytes.len(), "Memory link delivered bytes");
                    sink.push(&bytes)?;
                }
                Ok(Feed::Fail(reason)) => return Err(GatewayError::transport_fatal(reason)),
                Err(RecvTimeoutError::Timeout) => {
                    if sink.is_closed() {
                        debug!("Ingestion stopped, closing memory link");
                        return Ok(());
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Memory link feeders dropped, end of stream");
                    return Ok(());
                }
            }
        }
    }

    fn writer(&mut self) -> Result<Box<dyn FrameWriter>> {
        Ok(Box::new(MemoryWriter { written: self.written.clone() }))
    }
}

struct MemoryWriter {
    written: WrittenFrames,
}

impl FrameWriter for MemoryWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.written
            .frames
            .lock()
            .map_err(|_| GatewayError::transport_fatal("memory link writer poisoned"))?
            .push(frame.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IngestQueue;

    #[tokio::test]
    async fn fed_bytes_reach_the_queue() {
        let (mut transport, feeder) = MemoryTransport::new();
        let (sink, mut queue) = IngestQueue::Unbounded.channel();

        feeder.send(vec![1, 2]);
        feeder.send(vec![3]);
        drop(feeder);

        let reader = std::thread::spawn(move || transport.read_loop(&sink));
        let mut received = Vec::new();
        while let Some(chunk) = queue.recv().await {
            received.extend(chunk);
        }
        assert_eq!(received, vec![1, 2, 3]);
        assert!(reader.join().unwrap().is_ok());
    }

    #[test]
    fn failure_is_fatal() {
        let (mut transport, feeder) = MemoryTransport::new();
        let (sink, _queue) = IngestQueue::Unbounded.channel();
        feeder.fail("cable unplugged");
        let err = transport.read_loop(&sink).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("cable unplugged"));
    }

    #[test]
    fn writes_are_recorded() {
        let (mut transport, _feeder) = MemoryTransport::new();
        let written = transport.written();
        let mut writer = transport.writer().unwrap();
        writer.write_frame(&[0x7E, 1, 0x7E]).unwrap();
        assert_eq!(written.frames(), vec![vec![0x7E, 1, 0x7E]]);
    }
}
