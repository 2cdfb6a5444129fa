//! Fixed protocol header

use super::{read_u64_be, read_u8};
use crate::{GatewayError, Result};

/// Version written in every header this gateway emits.
pub const PROTOCOL_VERSION: u8 = 0;

/// Size of the encoded header in bytes.
pub const HEADER_SIZE: usize = 8 + 8 + 1 + 1;

/// Addressing header carried by every payload.
///
/// ```text
/// offset 0   destination  u64 BE
/// offset 8   source       u64 BE
/// offset 16  swarm id     u8
/// offset 17  version      u8
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader {
    pub destination: u64,
    pub source: u64,
    pub swarm_id: u8,
    pub version: u8,
}

impl ProtocolHeader {
    pub fn new(destination: u64, source: u64, swarm_id: u8) -> Self {
        Self { destination, source, swarm_id, version: PROTOCOL_VERSION }
    }

    /// Same header addressed to another device.
    pub fn with_destination(self, destination: u64) -> Self {
        Self { destination, ..self }
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(GatewayError::parse(
                "Protocol header",
                format!("need {} bytes, have {}", HEADER_SIZE, data.len()),
            ));
        }
        // The version byte is carried through as-is; only its presence is checked above
        Ok(Self {
            destination: read_u64_be(data, 0)?,
            source: read_u64_be(data, 8)?,
            swarm_id: read_u8(data, 16)?,
            version: read_u8(data, 17)?,
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.destination.to_be_bytes());
        out.extend_from_slice(&self.source.to_be_bytes());
        out.push(self.swarm_id);
        out.push(self.version);
    }
}
