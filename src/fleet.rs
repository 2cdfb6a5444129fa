//! Fleet membership state engine
//!
//! Owns the map of known robots. Telemetry payloads create and refresh
//! records; a periodic eviction pass removes robots that went silent. Every
//! membership change is announced to observers with a single reload
//! notification.
//!
//! The engine is driven from one task only and takes `&mut self`, so the map is
//! never locked.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::fanout::FanOut;
use crate::positioning::Positioning;
use crate::protocol::{Lh2RawData, PayloadBody, ProtocolPayload};
use crate::types::{DeviceRecord, DeviceSnapshot, Lh2Position, Notification, format_address};

/// A robot silent for longer than this is removed from the fleet.
pub const EVICTION_TIMEOUT: Duration = Duration::from_secs(3);

/// Fleet membership and the policy applied to incoming payloads.
#[derive(Debug)]
pub struct FleetEngine {
    devices: HashMap<u64, DeviceRecord>,
    /// Robot the controller is configured to drive
    active_address: u64,
    positioning: Positioning,
    verbose: bool,
}

impl FleetEngine {
    pub fn new(active_address: u64, positioning: Positioning) -> Self {
        Self { devices: HashMap::new(), active_address, positioning, verbose: false }
    }

    /// Log every accepted telemetry payload at info level.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn contains(&self, address: u64) -> bool {
        self.devices.contains_key(&address)
    }

    pub fn get(&self, address: u64) -> Option<&DeviceRecord> {
        self.devices.get(&address)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Point-in-time view of the fleet, sorted by address.
    pub fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let mut records: Vec<&DeviceRecord> = self.devices.values().collect();
        records.sort_by_key(|record| record.address);
        records.into_iter().map(DeviceRecord::snapshot).collect()
    }

    /// Apply a decoded payload received at `now`.
    pub fn apply(&mut self, payload: &ProtocolPayload, now: Instant, fanout: &FanOut) {
        // Commands on the link are echoes of what controllers sent, never telemetry
        if payload.payload_type().is_command() {
            return;
        }
        if self.verbose {
            info!("{}", payload);
        }

        let source = payload.header.source;
        let active = source == self.active_address;
        match self.devices.get_mut(&source) {
            Some(record) => record.touch(now, active),
            None => {
                info!(address = %format_address(source), active, "DotBot joined");
                // Queued before the insert; observers reloading on it query
                // the fleet after this frame is fully applied
                fanout.notify(&Notification::Reload);
                self.devices.insert(source, DeviceRecord::new(source, now, active));
            }
        }

        match &payload.body {
            PayloadBody::Lh2RawData(samples) => self.locate(source, samples, fanout),
            PayloadBody::Lh2Location(location) => {
                if let Some(record) = self.devices.get_mut(&source) {
                    record.lh2_position = Some(Lh2Position {
                        x: f64::from(location.x),
                        y: f64::from(location.y),
                        z: f64::from(location.z),
                    });
                }
            }
            _ => {}
        }
    }

    fn locate(&mut self, source: u64, samples: &Lh2RawData, fanout: &FanOut) {
        if let Some(path) = &self.positioning.capture_path {
            if let Err(e) = self.positioning.sink.capture(samples, path) {
                warn!("Calibration capture failed: {}", e);
            }
        }

        let Some(model) = &self.positioning.model else {
            return;
        };
        let Some((x, y)) = self.positioning.solver.solve(samples, model) else {
            return;
        };

        debug!(address = %format_address(source), x, y, "Position resolved");
        if let Some(record) = self.devices.get_mut(&source) {
            record.lh2_position = Some(Lh2Position { x, y, z: 0.0 });
        }
        fanout.notify(&Notification::Lh2Position { address: format_address(source), x, y });
    }

    /// Remove every robot silent for longer than [`EVICTION_TIMEOUT`].
    ///
    /// Emits one reload notification for the whole batch. Returns the evicted
    /// addresses.
    pub fn evict(&mut self, now: Instant, fanout: &FanOut) -> Vec<u64> {
        let expired: Vec<u64> = self
            .devices
            .values()
            .filter(|record| now.saturating_duration_since(record.last_seen) > EVICTION_TIMEOUT)
            .map(|record| record.address)
            .collect();

        for address in &expired {
            self.devices.remove(address);
            info!(address = %format_address(*address), "DotBot lost");
        }
        if !expired.is_empty() {
            fanout.notify(&Notification::Reload);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::positioning::{CalibrationModel, CalibrationSink};
    use crate::protocol::{CommandMoveRaw, CommandRgbLed, Lh2Location, ProtocolHeader};
    use crate::{GatewayError, Result};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    const ACTIVE: u64 = 0x0000_0000_0000_0001;

    fn telemetry(source: u64, body: PayloadBody) -> ProtocolPayload {
        ProtocolPayload::new(ProtocolHeader::new(0, source, 0), body)
    }

    fn observed() -> (FanOut, mpsc::UnboundedReceiver<String>) {
        let mut fanout = FanOut::default();
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        fanout.register(Arc::new(tx));
        (fanout, rx)
    }

    /// Everything delivered once the delivery tasks are idle.
    async fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<String> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_payload_from_unknown_address_reloads() {
        let (fanout, mut rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        let now = Instant::now();

        engine.apply(&telemetry(ACTIVE, PayloadBody::Advertisement), now, &fanout);
        assert_eq!(drain(&mut rx).await, vec![r#"{"cmd":"reload"}"#]);
        assert!(engine.get(ACTIVE).unwrap().active);

        engine.apply(&telemetry(ACTIVE, PayloadBody::Advertisement), now, &fanout);
        assert!(drain(&mut rx).await.is_empty(), "known address must not reload");
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn active_flag_tracks_configured_address() {
        let (fanout, _rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        engine.apply(&telemetry(0x2, PayloadBody::Advertisement), Instant::now(), &fanout);
        assert!(!engine.get(0x2).unwrap().active);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_never_touch_the_fleet() {
        let (fanout, mut rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        let now = Instant::now();

        engine.apply(&telemetry(0x5, PayloadBody::CmdMoveRaw(CommandMoveRaw::default())), now, &fanout);
        engine.apply(&telemetry(0x5, PayloadBody::CmdRgbLed(CommandRgbLed::default())), now, &fanout);
        assert!(engine.is_empty());

        // A command from a known robot must not refresh it either
        engine.apply(&telemetry(0x5, PayloadBody::Advertisement), now, &fanout);
        let later = now + Duration::from_secs(2);
        engine.apply(&telemetry(0x5, PayloadBody::CmdRgbLed(CommandRgbLed::default())), later, &fanout);
        assert_eq!(engine.get(0x5).unwrap().last_seen, now);
        assert_eq!(drain(&mut rx).await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_batches_one_reload() {
        let (fanout, mut rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        let t0 = Instant::now();

        for address in 1..=3 {
            engine.apply(&telemetry(address, PayloadBody::Advertisement), t0, &fanout);
        }
        let fresh = t0 + Duration::from_secs(2);
        engine.apply(&telemetry(4, PayloadBody::Advertisement), fresh, &fanout);
        drain(&mut rx).await;

        // Exactly at the threshold nothing expires
        assert!(engine.evict(t0 + EVICTION_TIMEOUT, &fanout).is_empty());
        assert!(drain(&mut rx).await.is_empty());

        let mut evicted = engine.evict(t0 + Duration::from_millis(3001), &fanout);
        evicted.sort();
        assert_eq!(evicted, vec![1, 2, 3]);
        assert_eq!(drain(&mut rx).await, vec![r#"{"cmd":"reload"}"#]);
        assert!(engine.contains(4));
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refreshed_device_survives_eviction() {
        let (fanout, _rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        let t0 = Instant::now();
        engine.apply(&telemetry(1, PayloadBody::Advertisement), t0, &fanout);
        engine.apply(&telemetry(1, PayloadBody::Advertisement), t0 + Duration::from_secs(2), &fanout);
        assert!(engine.evict(t0 + Duration::from_secs(4), &fanout).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn solved_position_is_broadcast_and_stored() {
        let (fanout, mut rx) = observed();
        let positioning = Positioning::default()
            .with_model(CalibrationModel::new(vec![0xCA, 0xFE]))
            .with_solver(|_: &Lh2RawData, model: &CalibrationModel| {
                (model.as_bytes() == [0xCA, 0xFE]).then_some((10.5, 3.2))
            });
        let mut engine = FleetEngine::new(ACTIVE, positioning);

        engine.apply(
            &telemetry(ACTIVE, PayloadBody::Lh2RawData(Lh2RawData::default())),
            Instant::now(),
            &fanout,
        );

        let messages = drain(&mut rx).await;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], r#"{"cmd":"reload"}"#);
        let position: serde_json::Value = serde_json::from_str(&messages[1]).unwrap();
        assert_eq!(position["cmd"], "lh2_position");
        assert_eq!(position["address"], "0000000000000001");
        assert_eq!(position["x"], 10.5);
        assert_eq!(position["y"], 3.2);

        let stored = engine.get(ACTIVE).unwrap().lh2_position.unwrap();
        assert_eq!((stored.x, stored.y), (10.5, 3.2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_model_means_no_position() {
        let (fanout, mut rx) = observed();
        let positioning =
            Positioning::default().with_solver(|_: &Lh2RawData, _: &CalibrationModel| Some((1.0, 1.0)));
        let mut engine = FleetEngine::new(ACTIVE, positioning);
        engine.apply(
            &telemetry(ACTIVE, PayloadBody::Lh2RawData(Lh2RawData::default())),
            Instant::now(),
            &fanout,
        );
        assert_eq!(drain(&mut rx).await, vec![r#"{"cmd":"reload"}"#]);
    }

    #[derive(Default, Clone)]
    struct RecordingSink {
        captured: Arc<Mutex<Vec<Lh2RawData>>>,
        fail: bool,
    }

    impl CalibrationSink for RecordingSink {
        fn capture(&self, samples: &Lh2RawData, _destination: &Path) -> Result<()> {
            if self.fail {
                return Err(GatewayError::io("capture", std::io::Error::other("disk full")));
            }
            self.captured.lock().unwrap().push(*samples);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn capture_mode_records_samples() {
        let (fanout, _rx) = observed();
        let sink = RecordingSink::default();
        let positioning = Positioning::default()
            .with_sink(sink.clone())
            .with_capture_path("/tmp/calibration.csv");
        let mut engine = FleetEngine::new(ACTIVE, positioning);

        let samples = Lh2RawData::default();
        engine.apply(&telemetry(ACTIVE, PayloadBody::Lh2RawData(samples)), Instant::now(), &fanout);
        assert_eq!(*sink.captured.lock().unwrap(), vec![samples]);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_failure_is_not_fatal() {
        let (fanout, _rx) = observed();
        let positioning = Positioning::default()
            .with_sink(RecordingSink { fail: true, ..Default::default() })
            .with_capture_path("/tmp/calibration.csv");
        let mut engine = FleetEngine::new(ACTIVE, positioning);
        engine.apply(
            &telemetry(ACTIVE, PayloadBody::Lh2RawData(Lh2RawData::default())),
            Instant::now(),
            &fanout,
        );
        assert!(engine.contains(ACTIVE));
    }

    #[tokio::test(start_paused = true)]
    async fn device_location_is_stored_silently() {
        let (fanout, mut rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        engine.apply(
            &telemetry(ACTIVE, PayloadBody::Lh2Location(Lh2Location { x: 100, y: 200, z: 0 })),
            Instant::now(),
            &fanout,
        );
        assert_eq!(drain(&mut rx).await.len(), 1);
        let snapshot = engine.snapshot();
        assert_eq!(snapshot[0].lh2_position, Some(Lh2Position { x: 100.0, y: 200.0, z: 0.0 }));
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_is_sorted_by_address() {
        let (fanout, _rx) = observed();
        let mut engine = FleetEngine::new(ACTIVE, Positioning::default());
        for address in [0x30, 0x10, 0x20] {
            engine.apply(&telemetry(address, PayloadBody::Advertisement), Instant::now(), &fanout);
        }
        let addresses: Vec<String> = engine.snapshot().into_iter().map(|s| s.address).collect();
        assert_eq!(addresses, vec!["0000000000000010", "0000000000000020", "0000000000000030"]);
    }
}
