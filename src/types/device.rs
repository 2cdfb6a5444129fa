//! Fleet member records

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

use super::format_address;

/// Last known position of a robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Lh2Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Fleet state entry for one robot.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub address: u64,
    /// Monotonic time of the last telemetry payload, drives eviction
    pub last_seen: Instant,
    /// Wall-clock time of the last telemetry payload, for display
    pub last_seen_wall: SystemTime,
    /// True iff this robot is the one the controller is configured to drive
    pub active: bool,
    pub lh2_position: Option<Lh2Position>,
}

impl DeviceRecord {
    pub fn new(address: u64, now: Instant, active: bool) -> Self {
        Self {
            address,
            last_seen: now,
            last_seen_wall: SystemTime::now(),
            active,
            lh2_position: None,
        }
    }

    /// Mark the record as seen at `now`.
    pub fn touch(&mut self, now: Instant, active: bool) {
        self.last_seen = now;
        self.last_seen_wall = SystemTime::now();
        self.active = active;
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        DeviceSnapshot {
            address: format_address(self.address),
            last_seen: self
                .last_seen_wall
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            active: self.active,
            lh2_position: self.lh2_position,
        }
    }
}

/// Serializable view of a [`DeviceRecord`] handed to the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub address: String,
    /// Seconds since the Unix epoch
    pub last_seen: f64,
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lh2_position: Option<Lh2Position>,
}
