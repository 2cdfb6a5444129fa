//! Payload types and their bodies

use std::fmt;

use super::header::{HEADER_SIZE, ProtocolHeader};
use super::{read_i8, read_u32_be, read_u64_be, read_u8};
use crate::{GatewayError, Result};

/// Payload type tag, the byte following the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PayloadType {
    CmdMoveRaw = 0,
    CmdRgbLed = 1,
    Lh2RawData = 2,
    Lh2Location = 3,
    Advertisement = 4,
}

impl PayloadType {
    /// Body length implied by this tag.
    pub const fn body_len(self) -> usize {
        match self {
            PayloadType::CmdMoveRaw => 4,
            PayloadType::CmdRgbLed => 3,
            PayloadType::Lh2RawData => LH2_RAW_LOCATION_COUNT * Lh2RawLocation::SIZE,
            PayloadType::Lh2Location => 12,
            PayloadType::Advertisement => 0,
        }
    }

    /// Commands only ever travel from the gateway to a robot.
    pub const fn is_command(self) -> bool {
        matches!(self, PayloadType::CmdMoveRaw | PayloadType::CmdRgbLed)
    }
}

impl TryFrom<u8> for PayloadType {
    type Error = GatewayError;

    fn try_from(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(PayloadType::CmdMoveRaw),
            1 => Ok(PayloadType::CmdRgbLed),
            2 => Ok(PayloadType::Lh2RawData),
            3 => Ok(PayloadType::Lh2Location),
            4 => Ok(PayloadType::Advertisement),
            other => Err(GatewayError::parse("Payload type", format!("unknown tag {other}"))),
        }
    }
}

/// Raw joystick-style motor command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandMoveRaw {
    pub left_x: i8,
    pub left_y: i8,
    pub right_x: i8,
    pub right_y: i8,
}

/// On-board RGB LED colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandRgbLed {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

/// Number of lighthouse sweeps reported per raw sample batch.
pub const LH2_RAW_LOCATION_COUNT: usize = 2;

/// One raw lighthouse sweep sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2RawLocation {
    pub bits: u64,
    pub polynomial_index: u8,
    pub offset: i8,
}

impl Lh2RawLocation {
    pub const SIZE: usize = 8 + 1 + 1;
}

/// Raw positioning-sample batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2RawData {
    pub locations: [Lh2RawLocation; LH2_RAW_LOCATION_COUNT],
}

/// Position already computed on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lh2Location {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Type-specific payload body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadBody {
    CmdMoveRaw(CommandMoveRaw),
    CmdRgbLed(CommandRgbLed),
    Lh2RawData(Lh2RawData),
    Lh2Location(Lh2Location),
    Advertisement,
}

impl PayloadBody {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            PayloadBody::CmdMoveRaw(_) => PayloadType::CmdMoveRaw,
            PayloadBody::CmdRgbLed(_) => PayloadType::CmdRgbLed,
            PayloadBody::Lh2RawData(_) => PayloadType::Lh2RawData,
            PayloadBody::Lh2Location(_) => PayloadType::Lh2Location,
            PayloadBody::Advertisement => PayloadType::Advertisement,
        }
    }

    fn parse(payload_type: PayloadType, data: &[u8]) -> Result<Self> {
        let body = match payload_type {
            PayloadType::CmdMoveRaw => PayloadBody::CmdMoveRaw(CommandMoveRaw {
                left_x: read_i8(data, 0)?,
                left_y: read_i8(data, 1)?,
                right_x: read_i8(data, 2)?,
                right_y: read_i8(data, 3)?,
            }),
            PayloadType::CmdRgbLed => PayloadBody::CmdRgbLed(CommandRgbLed {
                red: read_u8(data, 0)?,
                green: read_u8(data, 1)?,
                blue: read_u8(data, 2)?,
            }),
            PayloadType::Lh2RawData => {
                let mut locations = [Lh2RawLocation::default(); LH2_RAW_LOCATION_COUNT];
                for (index, location) in locations.iter_mut().enumerate() {
                    let base = index * Lh2RawLocation::SIZE;
                    *location = Lh2RawLocation {
                        bits: read_u64_be(data, base)?,
                        polynomial_index: read_u8(data, base + 8)?,
                        offset: read_i8(data, base + 9)?,
                    };
                }
                PayloadBody::Lh2RawData(Lh2RawData { locations })
            }
            PayloadType::Lh2Location => PayloadBody::Lh2Location(Lh2Location {
                x: read_u32_be(data, 0)?,
                y: read_u32_be(data, 4)?,
                z: read_u32_be(data, 8)?,
            }),
            PayloadType::Advertisement => PayloadBody::Advertisement,
        };
        Ok(body)
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            PayloadBody::CmdMoveRaw(cmd) => {
                out.extend_from_slice(&[
                    cmd.left_x as u8,
                    cmd.left_y as u8,
                    cmd.right_x as u8,
                    cmd.right_y as u8,
                ]);
            }
            PayloadBody::CmdRgbLed(cmd) => out.extend_from_slice(&[cmd.red, cmd.green, cmd.blue]),
            PayloadBody::Lh2RawData(raw) => {
                for location in &raw.locations {
                    out.extend_from_slice(&location.bits.to_be_bytes());
                    out.push(location.polynomial_index);
                    out.push(location.offset as u8);
                }
            }
            PayloadBody::Lh2Location(location) => {
                out.extend_from_slice(&location.x.to_be_bytes());
                out.extend_from_slice(&location.y.to_be_bytes());
                out.extend_from_slice(&location.z.to_be_bytes());
            }
            PayloadBody::Advertisement => {}
        }
    }
}

/// A decoded protocol message: header plus typed body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolPayload {
    pub header: ProtocolHeader,
    pub body: PayloadBody,
}

impl ProtocolPayload {
    pub fn new(header: ProtocolHeader, body: PayloadBody) -> Self {
        Self { header, body }
    }

    pub fn payload_type(&self) -> PayloadType {
        self.body.payload_type()
    }

    /// Decode a frame body.
    ///
    /// The remaining bytes after the tag must match the tag's body length
    /// exactly.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let header = ProtocolHeader::parse(data)?;
        let tag = data.get(HEADER_SIZE).copied().ok_or_else(|| {
            GatewayError::parse("Payload type", "frame ends before the payload type tag")
        })?;
        let payload_type = PayloadType::try_from(tag)?;

        let body = &data[HEADER_SIZE + 1..];
        if body.len() != payload_type.body_len() {
            return Err(GatewayError::parse(
                format!("{payload_type:?} body"),
                format!("expected {} bytes, have {}", payload_type.body_len(), body.len()),
            ));
        }

        Ok(Self { header, body: PayloadBody::parse(payload_type, body)? })
    }

    /// Encode to a frame body, the structural inverse of [`ProtocolPayload::decode`].
    pub fn encode(&self) -> Vec<u8> {
        let payload_type = self.payload_type();
        let mut out = Vec::with_capacity(HEADER_SIZE + 1 + payload_type.body_len());
        self.header.write_to(&mut out);
        out.push(payload_type as u8);
        self.body.write_to(&mut out);
        out
    }
}

impl fmt::Display for ProtocolPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {:016x} -> {:016x} (swarm {:#04x}, v{})",
            self.payload_type(),
            self.header.source,
            self.header.destination,
            self.header.swarm_id,
            self.header.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> ProtocolHeader {
        ProtocolHeader::new(0xFFFF_FFFF_FFFF_FFFF, 0x0000_0000_0000_0001, 0x00)
    }

    #[test]
    fn move_command_layout() {
        let payload = ProtocolPayload::new(
            header(),
            PayloadBody::CmdMoveRaw(CommandMoveRaw { left_x: 0, left_y: 100, right_x: -1, right_y: -100 }),
        );
        let bytes = payload.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 1 + 4);
        assert_eq!(bytes[HEADER_SIZE], PayloadType::CmdMoveRaw as u8);
        assert_eq!(&bytes[HEADER_SIZE + 1..], &[0, 100, 0xFF, 0x9C]);
        assert_eq!(ProtocolPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn lh2_raw_data_layout() {
        let raw = Lh2RawData {
            locations: [
                Lh2RawLocation { bits: 0x0102030405060708, polynomial_index: 3, offset: -2 },
                Lh2RawLocation { bits: 0xA0B0C0D0E0F00010, polynomial_index: 0, offset: 5 },
            ],
        };
        let bytes = ProtocolPayload::new(header(), PayloadBody::Lh2RawData(raw)).encode();
        let body = &bytes[HEADER_SIZE + 1..];
        assert_eq!(body.len(), 20);
        assert_eq!(&body[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(body[8], 3);
        assert_eq!(body[9], 0xFE);
    }

    #[test]
    fn advertisement_has_empty_body() {
        let payload = ProtocolPayload::new(header(), PayloadBody::Advertisement);
        let bytes = payload.encode();
        assert_eq!(bytes.len(), HEADER_SIZE + 1);
        assert_eq!(ProtocolPayload::decode(&bytes).unwrap(), payload);
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = ProtocolPayload::new(header(), PayloadBody::Advertisement).encode();
        bytes[HEADER_SIZE] = 0x42;
        let err = ProtocolPayload::decode(&bytes).unwrap_err();
        assert!(matches!(err, GatewayError::Parse { .. }));
        assert!(err.to_string().contains("unknown tag 66"));
    }

    #[test]
    fn missing_tag_is_rejected() {
        let mut bytes = Vec::new();
        header().write_to(&mut bytes);
        assert!(matches!(ProtocolPayload::decode(&bytes), Err(GatewayError::Parse { .. })));
    }

    #[test]
    fn body_length_must_match_tag() {
        let payload = ProtocolPayload::new(
            header(),
            PayloadBody::CmdRgbLed(CommandRgbLed { red: 1, green: 2, blue: 3 }),
        );
        let mut bytes = payload.encode();

        bytes.push(0);
        assert!(matches!(ProtocolPayload::decode(&bytes), Err(GatewayError::Parse { .. })));

        bytes.truncate(bytes.len() - 2);
        assert!(matches!(ProtocolPayload::decode(&bytes), Err(GatewayError::Parse { .. })));
    }

    #[test]
    fn command_classification() {
        assert!(PayloadType::CmdMoveRaw.is_command());
        assert!(PayloadType::CmdRgbLed.is_command());
        assert!(!PayloadType::Lh2RawData.is_command());
        assert!(!PayloadType::Lh2Location.is_command());
        assert!(!PayloadType::Advertisement.is_command());
    }
}
