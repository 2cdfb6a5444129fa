//! Controller settings
//!
//! Settings are read from YAML. Every field has a default, so an empty document
//! is a valid configuration. Addresses are hexadecimal strings and must be
//! quoted so YAML does not read them as numbers.
//!
//! ```yaml
//! port: /dev/ttyACM0
//! baudrate: 1000000
//! dotbot_address: "FFFFFFFFFFFFFFFF"
//! gw_address: "0000000000000000"
//! swarm_id: "0000"
//! controller: led-cycle
//! calibration_dir: /tmp
//! calibrate: false
//! ingest_queue:
//!   kind: bounded
//!   capacity: 4096
//! ```

use serde::{Deserialize, Deserializer};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::positioning::CALIBRATION_CAPTURE_FILE;
use crate::protocol::ProtocolHeader;
use crate::transport::IngestQueue;
use crate::types::parse_address;
use crate::{GatewayError, Result};

/// Settings of one controller instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// Serial port the gateway board is attached to
    pub port: String,
    pub baudrate: u32,
    /// Robot this controller drives, `FFFFFFFFFFFFFFFF` addresses every robot
    #[serde(deserialize_with = "hex_address")]
    pub dotbot_address: u64,
    /// Address the controller sends from
    #[serde(deserialize_with = "hex_address")]
    pub gw_address: u64,
    #[serde(deserialize_with = "hex_swarm_id")]
    pub swarm_id: u8,
    /// Name of the controller variant in the registry
    pub controller: String,
    pub calibration_dir: PathBuf,
    /// Capture raw lighthouse samples to the calibration directory
    pub calibrate: bool,
    /// Run the dashboard readiness hook once the dashboard is reachable
    pub webbrowser: bool,
    /// Log every received telemetry payload
    pub verbose: bool,
    pub dashboard_addr: SocketAddr,
    pub ingest_queue: IngestQueue,
    pub notify_timeout_ms: u64,
    pub refresh_interval_ms: u64,
    pub led_cycle_interval_ms: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baudrate: 1_000_000,
            dotbot_address: 0xFFFF_FFFF_FFFF_FFFF,
            gw_address: 0,
            swarm_id: 0,
            controller: "idle".to_string(),
            calibration_dir: PathBuf::from("/tmp"),
            calibrate: false,
            webbrowser: false,
            verbose: false,
            dashboard_addr: SocketAddr::from(([127, 0, 0, 1], 8000)),
            ingest_queue: IngestQueue::default(),
            notify_timeout_ms: 1000,
            refresh_interval_ms: 1000,
            led_cycle_interval_ms: 500,
        }
    }
}

impl ControllerSettings {
    /// Parse settings from a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::parse(yaml, Path::new("<inline>"))
    }

    /// Read settings from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::io(format!("reading settings {}", path.display()), e))?;
        Self::parse(&yaml, path)
    }

    fn parse(yaml: &str, path: &Path) -> Result<Self> {
        // An empty document is null in YAML, not an empty mapping
        let settings: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(yaml).map_err(|e| GatewayError::Settings {
                path: path.to_path_buf(),
                details: e.to_string(),
            })?
        };
        settings.validate().map_err(|e| GatewayError::Settings {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        debug!(?settings, "Settings loaded");
        Ok(settings)
    }

    /// Check values serde cannot check on its own.
    pub fn validate(&self) -> Result<()> {
        if let IngestQueue::Bounded { capacity: 0 } = self.ingest_queue {
            return Err(GatewayError::configuration("ingest queue capacity must be positive"));
        }
        for (name, value) in [
            ("notify_timeout_ms", self.notify_timeout_ms),
            ("refresh_interval_ms", self.refresh_interval_ms),
            ("led_cycle_interval_ms", self.led_cycle_interval_ms),
        ] {
            if value == 0 {
                return Err(GatewayError::configuration(format!("{name} must be positive")));
            }
        }
        Ok(())
    }

    /// Header for payloads sent by this controller.
    pub fn header(&self) -> ProtocolHeader {
        ProtocolHeader::new(self.dotbot_address, self.gw_address, self.swarm_id)
    }

    /// Where raw samples are captured, when calibration capture is enabled.
    pub fn calibration_capture_path(&self) -> Option<PathBuf> {
        self.calibrate.then(|| self.calibration_dir.join(CALIBRATION_CAPTURE_FILE))
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn led_cycle_interval(&self) -> Duration {
        Duration::from_millis(self.led_cycle_interval_ms)
    }
}

fn hex_address<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_address(&text).map_err(serde::de::Error::custom)
}

fn hex_swarm_id<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    let value = parse_address(&text).map_err(serde::de::Error::custom)?;
    u8::try_from(value).map_err(|_| {
        serde::de::Error::custom(format!("swarm id '{text}' does not fit in one byte"))
    })
}
