//! Controller run orchestration
//!
//! A run is a set of concurrent activities sharing one cancellation token:
//!
//! - **core**: owns the synchronizer, the fleet, the observer set and the frame
//!   writer. It multiplexes inbound bytes, the eviction tick and requests from
//!   [`GatewayHandle`]s, so none of that state is ever locked.
//! - **reader**: a dedicated OS thread running [`Transport::read_loop`], handing
//!   bytes to the core through the ingest queue.
//! - **refresh**: periodic [`StatusView`] rendering.
//! - **readiness**: optional one-time [`ReadinessHook`] once the dashboard
//!   answers.
//! - **variant**: [`ControllerVariant::start`].
//!
//! The run ends when the byte stream ends, when any activity fails fatally, or
//! when the shutdown token is cancelled. Whichever comes first cancels the rest.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::activities::{
    LogReadinessHook, LogStatusView, ReadinessHook, StatusView, probe_readiness, refresh_status,
};
use crate::controller::{ControllerRegistry, ControllerVariant};
use crate::fanout::FanOut;
use crate::fleet::FleetEngine;
use crate::handle::{Command, GatewayHandle, SendOutcome};
use crate::hdlc::{HdlcHandler, hdlc_encode};
use crate::positioning::{CalibrationModel, CalibrationSink, PositionSolver, Positioning};
use crate::protocol::ProtocolPayload;
use crate::settings::ControllerSettings;
use crate::transport::{ByteQueue, ByteSink, FrameWriter, Transport};
use crate::types::format_address;
use crate::{GatewayError, Result};

/// Period of the eviction pass.
pub const EVICTION_TICK: Duration = Duration::from_secs(1);

/// State owned by the core activity.
pub struct GatewayCore {
    hdlc: HdlcHandler,
    fleet: FleetEngine,
    fanout: FanOut,
    writer: Box<dyn FrameWriter>,
}

impl GatewayCore {
    pub fn new(fleet: FleetEngine, fanout: FanOut, writer: Box<dyn FrameWriter>) -> Self {
        Self { hdlc: HdlcHandler::new(), fleet, fanout, writer }
    }

    pub fn fleet(&self) -> &FleetEngine {
        &self.fleet
    }

    pub fn fanout_mut(&mut self) -> &mut FanOut {
        &mut self.fanout
    }

    /// Feed one byte, applying the frame it completes, if any.
    pub fn handle_byte(&mut self, byte: u8) {
        self.hdlc.feed(byte);
        if let Some(e) = self.hdlc.take_error() {
            debug!("{}", e);
        }
        let Some(frame) = self.hdlc.take_payload() else {
            return;
        };

        match ProtocolPayload::decode(&frame) {
            Ok(payload) => {
                trace!(
                    source = %format_address(payload.header.source),
                    kind = ?payload.payload_type(),
                    "Payload received"
                );
                self.fleet.apply(&payload, Instant::now(), &self.fanout);
            }
            Err(e) => warn!(len = frame.len(), "Dropping payload: {}", e),
        }
    }

    /// Feed a chunk of bytes in order.
    pub fn handle_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.handle_byte(byte);
        }
    }

    /// Run one eviction pass.
    pub fn tick(&mut self) -> Vec<u64> {
        self.fleet.evict(Instant::now(), &self.fanout)
    }

    /// The byte stream is over; drop any frame left open.
    pub fn end_of_stream(&mut self) {
        self.hdlc.end_of_stream();
        if let Some(e) = self.hdlc.take_error() {
            debug!("{}", e);
        }
        info!(
            frames = self.hdlc.frames_completed(),
            dropped = self.hdlc.frames_dropped(),
            "Byte stream ended"
        );
    }

    /// Encode, frame and write `payload` if its destination is in the fleet.
    pub fn send(&mut self, payload: &ProtocolPayload) -> Result<SendOutcome> {
        let destination = payload.header.destination;
        if !self.fleet.contains(destination) {
            trace!(address = %format_address(destination), "Discarding payload for unknown robot");
            return Ok(SendOutcome::Discarded);
        }

        let frame = hdlc_encode(&payload.encode());
        self.writer.write_frame(&frame).map_err(|e| {
            GatewayError::transport_fatal_with_source("writing frame", Box::new(e))
        })?;
        trace!(address = %format_address(destination), len = frame.len(), "Frame written");
        Ok(SendOutcome::Written)
    }

    /// Serve one handle request. Fails only when the link is gone.
    fn handle_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Send { payload, reply } => match self.send(&payload) {
                Ok(outcome) => {
                    let _ = reply.send(Ok(outcome));
                }
                Err(e) => {
                    let _ = reply.send(Err(GatewayError::transport_fatal(e.to_string())));
                    return Err(e);
                }
            },
            Command::Snapshot { reply } => {
                let _ = reply.send(self.fleet.snapshot());
            }
            Command::Register { observer, reply } => {
                let _ = reply.send(self.fanout.register(observer));
            }
            Command::Unregister { id, reply } => {
                let _ = reply.send(self.fanout.unregister(id));
            }
        }
        Ok(())
    }

    async fn run(
        mut self,
        mut queue: ByteQueue,
        mut reader: oneshot::Receiver<Result<()>>,
        mut commands: mpsc::Receiver<Command>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut eviction = interval(EVICTION_TICK);
        eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Core cancelled");
                    return Ok(());
                }
                _ = eviction.tick() => {
                    let evicted = self.tick();
                    if !evicted.is_empty() {
                        debug!(count = evicted.len(), remaining = self.fleet.len(), "Eviction pass");
                    }
                }
                Some(command) = commands.recv() => self.handle_command(command)?,
                chunk = queue.recv() => match chunk {
                    Some(bytes) => self.handle_bytes(&bytes),
                    None => {
                        self.end_of_stream();
                        // The reader reports before releasing the queue
                        return match (&mut reader).await {
                            Ok(result) => result,
                            Err(_) => Err(GatewayError::transport_fatal("reader thread panicked")),
                        };
                    }
                },
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Activity {
    Core,
    Readiness,
    Refresh,
    Variant,
}

/// One configured controller, ready to run against a transport.
pub struct Controller {
    settings: ControllerSettings,
    variant: Box<dyn ControllerVariant>,
    positioning: Positioning,
    status_view: Box<dyn StatusView>,
    readiness_hook: Arc<dyn ReadinessHook>,
    handle: GatewayHandle,
    commands: mpsc::Receiver<Command>,
    shutdown: CancellationToken,
}

impl Controller {
    /// Build a controller, selecting its variant from `registry`.
    ///
    /// A calibration model saved in the calibration directory is loaded if
    /// present.
    pub fn new(settings: ControllerSettings, registry: &ControllerRegistry) -> Result<Self> {
        settings.validate()?;
        let variant = registry.create(&settings.controller, &settings)?;

        let mut positioning = Positioning::default();
        match CalibrationModel::load_from_dir(&settings.calibration_dir) {
            Ok(Some(model)) => positioning.model = Some(model),
            Ok(None) => {}
            Err(e) => warn!("Calibration model not loaded: {}", e),
        }
        positioning.capture_path = settings.calibration_capture_path();

        let (handle, commands) = GatewayHandle::channel();
        Ok(Self {
            settings,
            variant,
            positioning,
            status_view: Box::new(LogStatusView),
            readiness_hook: Arc::new(LogReadinessHook),
            handle,
            commands,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_variant(mut self, variant: Box<dyn ControllerVariant>) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_solver(mut self, solver: impl PositionSolver) -> Self {
        self.positioning = self.positioning.with_solver(solver);
        self
    }

    pub fn with_calibration_sink(mut self, sink: impl CalibrationSink) -> Self {
        self.positioning = self.positioning.with_sink(sink);
        self
    }

    pub fn with_calibration_model(mut self, model: CalibrationModel) -> Self {
        self.positioning = self.positioning.with_model(model);
        self
    }

    pub fn with_status_view(mut self, view: impl StatusView) -> Self {
        self.status_view = Box::new(view);
        self
    }

    pub fn with_readiness_hook(mut self, hook: impl ReadinessHook) -> Self {
        self.readiness_hook = Arc::new(hook);
        self
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Request path into the core; requests are served once [`run`](Self::run)
    /// has started.
    pub fn handle(&self) -> GatewayHandle {
        self.handle.clone()
    }

    /// Cancelling this token ends the run cleanly.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run every activity against `transport` until the run ends.
    pub async fn run<T: Transport>(self, mut transport: T) -> Result<()> {
        let Controller {
            settings,
            mut variant,
            positioning,
            mut status_view,
            readiness_hook,
            handle,
            commands,
            shutdown,
        } = self;

        variant.init()?;
        let writer = transport.writer()?;
        info!(
            controller = variant.name(),
            port = %settings.port,
            baudrate = settings.baudrate,
            address = %format_address(settings.dotbot_address),
            "Controller starting"
        );

        let (sink, queue) = settings.ingest_queue.channel();
        let (reader_tx, reader_rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("dotbot-reader".to_string())
            .spawn(move || {
                let result = transport.read_loop(&sink);
                if let Err(e) = &result {
                    if reader_failed(&result, &sink) {
                        error!("Reader stopped: {}", e);
                    } else {
                        debug!("Reader stopped after ingestion ended: {}", e);
                    }
                }
                let _ = reader_tx.send(result);
                drop(sink);
            })
            .map_err(|e| GatewayError::io("spawning reader thread", e))?;

        let cancel = shutdown.child_token();
        let fleet = FleetEngine::new(settings.dotbot_address, positioning)
            .with_verbose(settings.verbose);
        let core = GatewayCore::new(fleet, FanOut::new(settings.notify_timeout()), writer);

        let mut tasks = JoinSet::new();
        {
            let cancel = cancel.clone();
            tasks.spawn(async move {
                (Activity::Core, core.run(queue, reader_rx, commands, cancel).await)
            });
        }
        {
            let gateway = handle.clone();
            let period = settings.refresh_interval();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = refresh_status(gateway, status_view.as_mut(), period, cancel).await;
                (Activity::Refresh, result)
            });
        }
        if settings.webbrowser {
            let addr = settings.dashboard_addr;
            let cancel = cancel.clone();
            tasks.spawn(async move {
                (Activity::Readiness, probe_readiness(addr, readiness_hook.as_ref(), cancel).await)
            });
        }
        {
            let gateway = handle.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                let result = tokio::select! {
                    _ = cancel.cancelled() => Ok(()),
                    result = variant.start(gateway) => result,
                };
                (Activity::Variant, result)
            });
        }

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((Activity::Core, result)) => {
                    outcome = result;
                    break;
                }
                Ok((activity, Ok(()))) => debug!(?activity, "Activity finished"),
                Ok((activity, Err(e))) if e.is_fatal() => {
                    error!(?activity, "Activity failed: {}", e);
                    outcome = Err(e);
                    break;
                }
                Ok((activity, Err(e))) => warn!(?activity, "Activity failed: {}", e),
                Err(e) => {
                    error!("Activity aborted: {}", e);
                    outcome = Err(GatewayError::transport_fatal_with_source(
                        "activity aborted",
                        Box::new(e),
                    ));
                    break;
                }
            }
        }

        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            if let Ok((activity, Err(e))) = joined {
                debug!(?activity, "Activity ended during shutdown: {}", e);
            }
        }

        match &outcome {
            Ok(()) => info!("Controller stopped"),
            Err(e) => error!("Controller stopped: {}", e),
        }
        outcome
    }
}

/// Whether the reader ended on a link failure rather than on the ingestion
/// side going away first.
fn reader_failed(result: &Result<()>, sink: &ByteSink) -> bool {
    result.is_err() && !sink.is_closed()
}
