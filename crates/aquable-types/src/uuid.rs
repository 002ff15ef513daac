//! Bluetooth UUIDs for aquarium dosers and lights.
//!
//! Both device families expose a Nordic-UART style GATT service: one
//! characteristic accepts command frames, the other notifies status frames.

use uuid::{Uuid, uuid};

// --- UART Service ---

/// UART service UUID.
pub const UART_SERVICE: Uuid = uuid!("6e400001-b5a3-f393-e0a9-e50e24dcca9e");

/// Command ingress (host → device). Written without response.
pub const UART_RX: Uuid = uuid!("6e400002-b5a3-f393-e0a9-e50e24dcca9e");

/// Status and acknowledgement egress (device → host). Notify only.
pub const UART_TX: Uuid = uuid!("6e400003-b5a3-f393-e0a9-e50e24dcca9e");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uart_characteristics_share_base() {
        let base = |u: Uuid| u.as_bytes()[2..].to_vec();
        assert_eq!(base(UART_RX), base(UART_SERVICE));
        assert_eq!(base(UART_TX), base(UART_SERVICE));
        assert_ne!(UART_RX, UART_TX);
    }

    #[test]
    fn test_uart_uuid_strings() {
        assert_eq!(
            UART_RX.to_string().to_uppercase(),
            "6E400002-B5A3-F393-E0A9-E50E24DCCA9E"
        );
        assert_eq!(
            UART_TX.to_string().to_uppercase(),
            "6E400003-B5A3-F393-E0A9-E50E24DCCA9E"
        );
    }
}
