//! # Frame Definitions
//!
//! Every frame exchanged on the buzzer bus.
//!
//! All frame types are `Copy` and fixed-size so the receive path can hand
//! them across contexts without allocating.

use std::fmt;

use crate::constants::{BROADCAST_ADDRESS, MAX_IDENTIFIER, TO_PERIPHERAL_OFFSET};

/// Stable numeric identity of a buzzer, assigned out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeripheralId(pub u8);

impl PeripheralId {
    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Intent codes carried in payload byte 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Intent {
    /// Controller -> all: idle heartbeat, no round pending.
    Idle = 0x00,
    /// Controller -> peripheral: you are armed for this round.
    Arm = 0x01,
    /// Peripheral -> controller: button pressed.
    Press = 0x02,
    /// Peripheral -> controller: liveness beacon.
    Presence = 0x03,
}

impl Intent {
    /// Maps a wire code to an intent.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x00 => Some(Self::Idle),
            0x01 => Some(Self::Arm),
            0x02 => Some(Self::Press),
            0x03 => Some(Self::Presence),
            _ => None,
        }
    }

    /// Returns the wire code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Where a frame is going, or where it came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Address {
    /// Reserved broadcast identifier.
    Broadcast,
    /// Controller -> peripheral, on `id | TO_PERIPHERAL_OFFSET`.
    ToPeripheral(PeripheralId),
    /// Peripheral -> controller, on the bare id.
    FromPeripheral(PeripheralId),
}

impl Address {
    /// Resolves an 11-bit identifier.
    ///
    /// Returns `None` for identifiers outside the three address ranges.
    #[must_use]
    pub fn from_identifier(identifier: u32) -> Option<Self> {
        if identifier == BROADCAST_ADDRESS {
            return Some(Self::Broadcast);
        }
        if identifier > MAX_IDENTIFIER {
            return None;
        }
        let id = u8::try_from(identifier & 0xFF).ok()?;
        match identifier & !0xFF {
            0 => Some(Self::FromPeripheral(PeripheralId(id))),
            TO_PERIPHERAL_OFFSET => Some(Self::ToPeripheral(PeripheralId(id))),
            _ => None,
        }
    }

    /// Returns the 11-bit identifier for this address.
    #[must_use]
    pub const fn identifier(self) -> u32 {
        match self {
            Self::Broadcast => BROADCAST_ADDRESS,
            Self::ToPeripheral(id) => id.0 as u32 | TO_PERIPHERAL_OFFSET,
            Self::FromPeripheral(id) => id.0 as u32,
        }
    }
}

/// Frame contents after the intent has been resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameBody {
    /// Idle heartbeat.
    Idle,
    /// Arm notification.
    Arm,
    /// Liveness beacon.
    Presence,
    /// Button press.
    Press {
        /// Per-press identifier, repeated on retransmission.
        nonce: u8,
        /// Latency since arming on the peripheral's own clock, if known.
        latency_ms: Option<u32>,
    },
}

impl FrameBody {
    /// Returns the intent code for this body.
    #[must_use]
    pub const fn intent(&self) -> Intent {
        match self {
            Self::Idle => Intent::Idle,
            Self::Arm => Intent::Arm,
            Self::Presence => Intent::Presence,
            Self::Press { .. } => Intent::Press,
        }
    }
}

/// A decoded bus frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Addressing.
    pub address: Address,
    /// Contents.
    pub body: FrameBody,
}

impl Frame {
    /// Idle heartbeat broadcast from the controller.
    #[must_use]
    pub const fn idle() -> Self {
        Self {
            address: Address::Broadcast,
            body: FrameBody::Idle,
        }
    }

    /// Arm notification for one peripheral.
    #[must_use]
    pub const fn arm(id: PeripheralId) -> Self {
        Self {
            address: Address::ToPeripheral(id),
            body: FrameBody::Arm,
        }
    }

    /// Liveness beacon from a peripheral.
    #[must_use]
    pub const fn presence(id: PeripheralId) -> Self {
        Self {
            address: Address::FromPeripheral(id),
            body: FrameBody::Presence,
        }
    }

    /// Press report from a peripheral.
    #[must_use]
    pub const fn press(id: PeripheralId, nonce: u8, latency_ms: Option<u32>) -> Self {
        Self {
            address: Address::FromPeripheral(id),
            body: FrameBody::Press { nonce, latency_ms },
        }
    }

    /// Returns the intent of this frame.
    #[inline]
    #[must_use]
    pub const fn intent(&self) -> Intent {
        self.body.intent()
    }

    /// Returns the sending peripheral, for peripheral -> controller traffic.
    #[must_use]
    pub const fn sender(&self) -> Option<PeripheralId> {
        match self.address {
            Address::FromPeripheral(id) => Some(id),
            Address::Broadcast | Address::ToPeripheral(_) => None,
        }
    }
}
