//! Replay transport for recorded link captures

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::transport::{ByteSink, FrameWriter, Transport};
use crate::{GatewayError, Result};

/// Bytes handed to the ingest queue per push.
const REPLAY_CHUNK: usize = 64;

/// Plays back a raw byte capture of the serial link.
///
/// With a pacing baudrate set, chunks are delivered no faster than the link
/// would have carried them (10 bits per byte on the wire). Outbound frames are
/// accepted and dropped: there is no robot on the other end of a recording.
pub struct ReplayTransport {
    path: PathBuf,
    data: Vec<u8>,
    chunk_delay: Option<Duration>,
}

impl ReplayTransport {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = std::fs::read(&path)
            .map_err(|e| GatewayError::io(format!("reading capture {}", path.display()), e))?;
        info!("Opened link capture {}: {} bytes", path.display(), data.len());
        Ok(Self { path, data, chunk_delay: None })
    }

    /// Pace playback at the given serial baudrate.
    pub fn paced(mut self, baudrate: u32) -> Self {
        if baudrate > 0 {
            let bytes_per_second = f64::from(baudrate) / 10.0;
            self.chunk_delay = Some(Duration::from_secs_f64(REPLAY_CHUNK as f64 / bytes_per_second));
            debug!(baudrate, "Replay paced");
        }
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Transport for ReplayTransport {
    fn read_loop(&mut self, sink: &ByteSink) -> Result<()> {
        for chunk in self.data.chunks(REPLAY_CHUNK) {
            sink.push(chunk)?;
            if let Some(delay) = self.chunk_delay {
                std::thread::sleep(delay);
            }
        }
        info!("Reached end of capture {}", self.path.display());
        Ok(())
    }

    fn writer(&mut self) -> Result<Box<dyn FrameWriter>> {
        Ok(Box::new(ReplayWriter))
    }
}

struct ReplayWriter;

impl FrameWriter for ReplayWriter {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        trace!(len = frame.len(), "Replay dropped outbound frame");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::IngestQueue;

    #[tokio::test]
    async fn capture_is_replayed_in_order() {
        let path = std::env::temp_dir()
            .join(format!("dotbot-gateway-replay-{}.bin", std::process::id()));
        let capture: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &capture).unwrap();

        let mut transport = ReplayTransport::open(&path).unwrap();
        assert_eq!(transport.len(), 1000);
        let (sink, mut queue) = IngestQueue::Bounded { capacity: 4 }.channel();
        let reader = std::thread::spawn(move || transport.read_loop(&sink));

        let mut received = Vec::new();
        while let Some(chunk) = queue.recv().await {
            received.extend(chunk);
        }
        assert_eq!(received, capture);
        assert!(reader.join().unwrap().is_ok());
    }

    #[test]
    fn missing_capture_is_an_io_error() {
        let result = ReplayTransport::open("/definitely/not/here.bin");
        assert!(matches!(result, Err(GatewayError::Io { .. })));
    }
}
