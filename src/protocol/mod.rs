//! DotBot binary protocol codec.
//!
//! Every frame body is a fixed 18-byte header, a one-byte payload type tag and
//! a body whose length is fully determined by the tag. All multi-byte fields
//! are big-endian.
//!
//! ```text
//! ┌──────────┬──────────┬───────┬─────────┬──────┬────────────────┐
//! │ dest u64 │ src u64  │ swarm │ version │ tag  │ body (per tag) │
//! └──────────┴──────────┴───────┴─────────┴──────┴────────────────┘
//! ```
//!
//! ```rust
//! use dotbot_gateway::protocol::{CommandRgbLed, PayloadBody, ProtocolHeader, ProtocolPayload};
//!
//! let header = ProtocolHeader::new(0x0000000000000001, 0x0000000000000000, 0x00);
//! let payload = ProtocolPayload::new(
//!     header,
//!     PayloadBody::CmdRgbLed(CommandRgbLed { red: 255, green: 0, blue: 0 }),
//! );
//! let bytes = payload.encode();
//! assert_eq!(ProtocolPayload::decode(&bytes).unwrap(), payload);
//! ```

mod header;
mod payload;

pub use header::{HEADER_SIZE, PROTOCOL_VERSION, ProtocolHeader};
pub use payload::{
    CommandMoveRaw, CommandRgbLed, LH2_RAW_LOCATION_COUNT, Lh2Location, Lh2RawData,
    Lh2RawLocation, PayloadBody, PayloadType, ProtocolPayload,
};

use crate::{GatewayError, Result};

fn short_read(what: &str, offset: usize, need: usize, data: &[u8]) -> GatewayError {
    GatewayError::parse(
        "Field decoding",
        format!(
            "Insufficient data for {} at offset {} (need {} bytes, have {})",
            what,
            offset,
            need,
            data.len().saturating_sub(offset)
        ),
    )
}

fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    data.get(offset).copied().ok_or_else(|| short_read("u8", offset, 1, data))
}

fn read_i8(data: &[u8], offset: usize) -> Result<i8> {
    read_u8(data, offset).map(|b| b as i8)
}

fn read_u32_be(data: &[u8], offset: usize) -> Result<u32> {
    data.get(offset..offset + 4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| short_read("u32", offset, 4, data))
}

fn read_u64_be(data: &[u8], offset: usize) -> Result<u64> {
    data.get(offset..offset + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .ok_or_else(|| short_read("u64", offset, 8, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    prop_compose! {
        fn arb_header()(
            destination in any::<u64>(),
            source in any::<u64>(),
            swarm_id in any::<u8>(),
            version in any::<u8>()
        ) -> ProtocolHeader {
            ProtocolHeader { destination, source, swarm_id, version }
        }
    }

    fn arb_raw_location() -> impl Strategy<Value = Lh2RawLocation> {
        (any::<u64>(), any::<u8>(), any::<i8>()).prop_map(|(bits, polynomial_index, offset)| {
            Lh2RawLocation { bits, polynomial_index, offset }
        })
    }

    fn arb_body() -> impl Strategy<Value = PayloadBody> {
        prop_oneof![
            any::<[i8; 4]>().prop_map(|[left_x, left_y, right_x, right_y]| {
                PayloadBody::CmdMoveRaw(CommandMoveRaw { left_x, left_y, right_x, right_y })
            }),
            any::<[u8; 3]>().prop_map(|[red, green, blue]| {
                PayloadBody::CmdRgbLed(CommandRgbLed { red, green, blue })
            }),
            (arb_raw_location(), arb_raw_location())
                .prop_map(|(a, b)| PayloadBody::Lh2RawData(Lh2RawData { locations: [a, b] })),
            any::<[u32; 3]>()
                .prop_map(|[x, y, z]| PayloadBody::Lh2Location(Lh2Location { x, y, z })),
            Just(PayloadBody::Advertisement),
        ]
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(header in arb_header(), body in arb_body()) {
            let payload = ProtocolPayload::new(header, body);
            let bytes = payload.encode();
            prop_assert_eq!(bytes.len(), HEADER_SIZE + 1 + payload.payload_type().body_len());
            prop_assert_eq!(ProtocolPayload::decode(&bytes).unwrap(), payload);
        }

        #[test]
        fn prop_decode_never_panics(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let _ = ProtocolPayload::decode(&data);
        }
    }

    #[test]
    fn readers_report_short_data() {
        assert!(read_u8(&[], 0).is_err());
        assert!(read_u32_be(&[1, 2, 3], 0).is_err());
        assert!(read_u64_be(&[0; 8], 1).is_err());
        assert_eq!(read_u32_be(&[0, 0, 1, 0], 0).unwrap(), 256);
    }
}
