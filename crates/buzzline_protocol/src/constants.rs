//! # Bus Constants
//!
//! Address conventions shared by the controller and every peripheral.
//!
//! **CRITICAL:** These values are flashed into peripheral firmware.
//! Changing them requires reflashing every buzzer.

// =============================================================================
// ADDRESSING
// =============================================================================

/// Reserved identifier used for controller broadcasts (idle heartbeat).
pub const BROADCAST_ADDRESS: u32 = 0x7FF;

/// Offset added to a peripheral id for controller -> peripheral traffic.
///
/// Peripherals transmit on their bare id; the controller addresses them on
/// `id | TO_PERIPHERAL_OFFSET`, so both directions share one address space.
pub const TO_PERIPHERAL_OFFSET: u32 = 0x100;

/// Largest standard (11-bit) identifier.
pub const MAX_IDENTIFIER: u32 = 0x7FF;

// =============================================================================
// PAYLOAD
// =============================================================================

/// Maximum payload bytes per frame.
pub const MAX_PAYLOAD: usize = 8;

/// Payload length of a press frame without an embedded timestamp.
pub const PRESS_LEN: usize = 2;

/// Payload length of a press frame carrying the 4-byte latency tail.
pub const PRESS_WITH_TIMESTAMP_LEN: usize = 6;

/// Payload length of intent-only frames (idle, arm, presence).
pub const INTENT_ONLY_LEN: usize = 1;
