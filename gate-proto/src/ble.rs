//! BLE GATT constants for the gate controller
//!
//! The controller is a serial-over-BLE module exposing a single characteristic
//! that is both written (commands) and notified (responses).

/// BLE Service UUID of the serial module
pub const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";

/// Command/response Characteristic UUID (write + notify)
pub const CHARACTERISTIC_UUID: &str = "0000ffe1-0000-1000-8000-00805f9b34fb";

/// Hardware address of the gate controller
pub const MAC_ADDRESS: &str = "00:15:83:00:C3:F7";

/// Advertised device name
pub const DEVICE_NAME: &str = "Gate BT";
