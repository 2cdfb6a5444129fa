//! Auxiliary activities running alongside the gateway core
//!
//! Both activities talk to the core only through a [`GatewayHandle`] and stop
//! as soon as the run's cancellation token fires.

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::handle::GatewayHandle;
use crate::types::DeviceSnapshot;
use crate::{GatewayError, Result};

/// Delay between two reachability attempts.
pub const READINESS_RETRY: Duration = Duration::from_millis(100);

/// Periodically presented view of the fleet.
pub trait StatusView: Send + 'static {
    fn render(&mut self, fleet: &[DeviceSnapshot]);
}

/// Logs the fleet as a table at `debug`.
#[derive(Debug, Default)]
pub struct LogStatusView;

impl StatusView for LogStatusView {
    fn render(&mut self, fleet: &[DeviceSnapshot]) {
        debug!("{:<18} {:<8} {:>14} {}", "address", "active", "last seen", "position");
        for device in fleet {
            let position = device
                .lh2_position
                .map(|p| format!("({:.3}, {:.3}, {:.3})", p.x, p.y, p.z))
                .unwrap_or_else(|| "-".to_string());
            debug!(
                "{:<18} {:<8} {:>14.3} {}",
                device.address, device.active, device.last_seen, position
            );
        }
    }
}

/// One-time side effect once the dashboard answers.
pub trait ReadinessHook: Send + Sync + 'static {
    fn on_ready(&self, addr: SocketAddr);
}

/// Logs the dashboard URL.
#[derive(Debug, Default)]
pub struct LogReadinessHook;

impl ReadinessHook for LogReadinessHook {
    fn on_ready(&self, addr: SocketAddr) {
        info!("Dashboard ready at http://{}/dotbots", addr);
    }
}

/// Retry a TCP connection to `addr` until it succeeds.
pub async fn wait_until_reachable(addr: SocketAddr) {
    let mut attempts = 0u32;
    loop {
        match TcpStream::connect(addr).await {
            Ok(_) => {
                debug!(%addr, attempts, "Endpoint reachable");
                return;
            }
            Err(e) => {
                attempts += 1;
                trace!(%addr, attempts, "Endpoint not reachable yet: {}", e);
                tokio::time::sleep(READINESS_RETRY).await;
            }
        }
    }
}

/// Wait for the dashboard, then run `hook` once.
pub(crate) async fn probe_readiness(
    addr: SocketAddr,
    hook: &dyn ReadinessHook,
    cancel: CancellationToken,
) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Readiness probe cancelled");
        }
        _ = wait_until_reachable(addr) => hook.on_ready(addr),
    }
    Ok(())
}

/// Render a fresh fleet snapshot on every tick.
pub(crate) async fn refresh_status(
    gateway: GatewayHandle,
    view: &mut dyn StatusView,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = ticker.tick() => {}
        }
        match gateway.snapshot().await {
            Ok(fleet) => view.render(&fleet),
            // Core ended first, the run is shutting down
            Err(GatewayError::Stopped) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::Command;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    #[derive(Clone, Default)]
    struct RecordingView(Arc<Mutex<Vec<usize>>>);

    impl StatusView for RecordingView {
        fn render(&mut self, fleet: &[DeviceSnapshot]) {
            self.0.lock().unwrap().push(fleet.len());
        }
    }

    #[derive(Default)]
    struct RecordingHook(Mutex<Vec<SocketAddr>>);

    impl ReadinessHook for RecordingHook {
        fn on_ready(&self, addr: SocketAddr) {
            self.0.lock().unwrap().push(addr);
        }
    }

    #[tokio::test]
    async fn hook_runs_once_endpoint_listens() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hook = RecordingHook::default();

        probe_readiness(addr, &hook, CancellationToken::new()).await.unwrap();
        assert_eq!(*hook.0.lock().unwrap(), vec![addr]);
    }

    #[tokio::test]
    async fn waits_for_a_late_listener() {
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let listener = tokio::spawn(async move {
            tokio::time::sleep(READINESS_RETRY * 3).await;
            let listener = TcpListener::bind(addr).await.unwrap();
            let _ = listener.accept().await;
        });

        let hook = RecordingHook::default();
        let probe = probe_readiness(addr, &hook, CancellationToken::new());
        tokio::time::timeout(Duration::from_secs(5), probe).await.unwrap().unwrap();
        assert_eq!(*hook.0.lock().unwrap(), vec![addr]);
        listener.abort();
    }

    #[tokio::test]
    async fn cancelled_probe_skips_hook() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
        let hook = RecordingHook::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        probe_readiness(addr, &hook, cancel).await.unwrap();
        assert!(hook.0.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_stops_when_core_is_gone() {
        let (gateway, mut rx) = GatewayHandle::channel();
        let core = tokio::spawn(async move {
            for _ in 0..3 {
                if let Some(Command::Snapshot { reply }) = rx.recv().await {
                    let _ = reply.send(Vec::new());
                }
            }
        });

        let view = RecordingView::default();
        let mut rendered = view.clone();
        refresh_status(gateway, &mut rendered, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap();
        core.await.unwrap();
        assert_eq!(*view.0.lock().unwrap(), vec![0, 0, 0]);
    }
}
