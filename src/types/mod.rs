//! Core types shared across the gateway.
//!
//! - [`DeviceRecord`] is the fleet state entry for one robot
//! - [`DeviceSnapshot`] is its serializable point-in-time view
//! - [`Notification`] is what observers receive
//!
//! Addresses are `u64` internally and 16-character lowercase hex strings on
//! every external surface.

mod device;
mod notification;

pub use device::{DeviceRecord, DeviceSnapshot, Lh2Position};
pub use notification::Notification;

use crate::{GatewayError, Result};

/// Format an address the way observers and logs see it.
pub fn format_address(address: u64) -> String {
    format!("{address:016x}")
}

/// Parse a hexadecimal address, with or without a `0x` prefix.
pub fn parse_address(text: &str) -> Result<u64> {
    let digits = text.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() || digits.len() > 16 {
        return Err(GatewayError::configuration(format!(
            "address '{text}' must be 1 to 16 hex digits"
        )));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| GatewayError::configuration(format!("address '{text}' is not hex: {e}")))
}
