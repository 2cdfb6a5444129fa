//! Gateway controller for a DotBot fleet.
//!
//! The gateway sits between a serial radio link shared by a swarm of small
//! robots and any number of live observers, typically dashboard clients.
//!
//! # Features
//!
//! - **Framing**: HDLC-style byte stuffing, robust to arbitrary chunking and noise
//! - **Protocol**: fixed big-endian header plus tagged payload bodies
//! - **Fleet tracking**: robots join on first telemetry and leave after 3 s of silence
//! - **Fan-out**: JSON notifications to every observer, one slow client never blocks others
//! - **Orchestration**: ingestion, eviction, presentation and the controller variant
//!   run concurrently and stop as a unit
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use dotbot_gateway::{Controller, ControllerRegistry, ControllerSettings, ReplayTransport};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ControllerSettings::from_file("controller.yaml")?;
//!     dotbot_gateway::init_tracing(settings.verbose);
//!
//!     let controller = Controller::new(settings, &ControllerRegistry::with_builtin())?;
//!     let gateway = controller.handle();
//!     let run = tokio::spawn(controller.run(ReplayTransport::open("capture.bin")?));
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
//!     gateway.register_observer(Arc::new(tx)).await?;
//!     while let Some(message) = rx.recv().await {
//!         println!("{message}");
//!     }
//!     run.await??;
//!     Ok(())
//! }
//! ```

mod error;
pub mod types;

// Wire format
pub mod hdlc;
pub mod protocol;

// Fleet state and notifications
pub mod fanout;
pub mod fleet;
pub mod positioning;

// Byte sources
pub mod transport;
pub mod transports;

// Controller runtime
pub mod activities;
pub mod controller;
pub mod handle;
pub mod orchestrator;
pub mod settings;

// Core exports
pub use error::*;
pub use types::*;

pub use activities::{LogReadinessHook, LogStatusView, ReadinessHook, StatusView};
pub use controller::{ControllerRegistry, ControllerVariant, VariantConstructor};
pub use fanout::{FanOut, Observer, ObserverId};
pub use fleet::{EVICTION_TIMEOUT, FleetEngine};
pub use handle::{GatewayHandle, SendOutcome};
pub use hdlc::{HdlcHandler, HdlcState, hdlc_encode};
pub use orchestrator::{Controller, GatewayCore};
pub use positioning::{CalibrationModel, CalibrationSink, PositionSolver};
pub use protocol::{PayloadBody, PayloadType, ProtocolHeader, ProtocolPayload};
pub use settings::ControllerSettings;
pub use transport::{ByteSink, FrameWriter, IngestQueue, Transport};
pub use transports::{LinkFeeder, MemoryTransport, ReplayTransport};

/// Install a `tracing` subscriber for applications embedding the gateway.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects `debug` over
/// `info`. Does nothing if a subscriber is already installed.
pub fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
