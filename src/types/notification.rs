//! Observer-facing notification messages

use serde::{Deserialize, Serialize};

use crate::{GatewayError, Result};

/// Message pushed to every observer.
///
/// Serialized with a `cmd` discriminator:
///
/// ```json
/// {"cmd":"reload"}
/// {"cmd":"lh2_position","address":"0000000000000001","x":10.5,"y":3.2}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Notification {
    /// Fleet membership changed, observers should refetch the fleet
    Reload,
    /// A position was resolved for a robot
    Lh2Position { address: String, x: f64, y: f64 },
}

impl Notification {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| GatewayError::parse("Notification encoding", e.to_string()))
    }
}
