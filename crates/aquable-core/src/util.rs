//! Utility functions shared across aquable-core.

use btleplug::platform::PeripheralId;
use time::OffsetDateTime;

/// Current wall-clock time in the local offset, falling back to UTC when the
/// offset cannot be determined.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Canonical form of a device address used as a map key.
///
/// ```
/// use aquable_core::util::normalize_address;
///
/// assert_eq!(normalize_address(" aa:bb:cc:dd:ee:ff "), "AA:BB:CC:DD:EE:FF");
/// ```
pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_uppercase()
}

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// Bluetooth address.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Address for a peripheral.
///
/// On macOS the reported address is all zeros, so the peripheral ID is used
/// instead.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_placeholder_address(address) {
        normalize_address(&format_peripheral_id(peripheral_id))
    } else {
        normalize_address(address)
    }
}

fn is_placeholder_address(address: &str) -> bool {
    address == "00:00:00:00:00:00"
}
