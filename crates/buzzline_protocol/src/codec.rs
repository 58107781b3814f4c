//! # Frame Codec
//!
//! Bit-exact encoding between [`Frame`] and the raw bus representation.
//!
//! ## Design
//!
//! - [`RawFrame`] is a `Pod` mirror of what a bus adapter hands over
//!   (identifier, length, 8 data bytes), so it can be copied straight out of
//!   an adapter buffer
//! - Multi-byte payload fields are big-endian
//! - Decoding validates direction, intent and length together

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

use crate::constants::{
    INTENT_ONLY_LEN, MAX_IDENTIFIER, MAX_PAYLOAD, PRESS_LEN, PRESS_WITH_TIMESTAMP_LEN,
};
use crate::frame::{Address, Frame, FrameBody, Intent};

/// Errors produced while decoding bus traffic.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Identifier is outside every known address range.
    #[error("unroutable identifier {0:#05x}")]
    UnknownAddress(u32),

    /// Data length code exceeds the payload capacity.
    #[error("payload length {0} exceeds 8 bytes")]
    PayloadTooLong(usize),

    /// Frame carries no payload at all.
    #[error("empty payload")]
    EmptyPayload,

    /// First payload byte is not a known intent code.
    #[error("unknown intent code {0:#04x}")]
    UnknownIntent(u8),

    /// Intent is not valid for the direction it travelled.
    #[error("intent {intent:?} not valid on {address:?}")]
    UnexpectedIntent {
        /// Where the frame was addressed.
        address: Address,
        /// What it claimed to be.
        intent: Intent,
    },

    /// Payload length does not match the intent's layout.
    #[error("intent {intent:?} with invalid length {len}")]
    BadLength {
        /// Intent being decoded.
        intent: Intent,
        /// Observed payload length.
        len: usize,
    },

    /// Raw byte buffer is not the size of a [`RawFrame`].
    #[error("raw frame buffer of {0} bytes")]
    BadRawSize(usize),
}

/// Result type for codec operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Raw frame as delivered by a bus adapter.
///
/// Size: 16 bytes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct RawFrame {
    /// 11-bit identifier.
    pub identifier: u32,
    /// Data length code (0..=8).
    pub len: u8,
    /// Payload bytes; only the first `len` are meaningful.
    pub data: [u8; MAX_PAYLOAD],
    /// Padding for alignment.
    pub _padding: [u8; 3],
}

impl RawFrame {
    /// Size in bytes.
    pub const SIZE: usize = 16;

    /// Builds a raw frame from an identifier and payload slice.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::PayloadTooLong`] if `payload` exceeds 8 bytes.
    pub fn new(identifier: u32, payload: &[u8]) -> FrameResult<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(payload.len()));
        }
        let mut data = [0u8; MAX_PAYLOAD];
        data[..payload.len()].copy_from_slice(payload);
        Ok(Self {
            identifier,
            // Bounded by MAX_PAYLOAD above.
            len: payload.len() as u8,
            data,
            _padding: [0; 3],
        })
    }

    /// Returns the meaningful payload bytes.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.data[..usize::from(self.len).min(MAX_PAYLOAD)]
    }

    /// Returns the adapter byte representation.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Reads a raw frame from an adapter buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::BadRawSize`] unless `bytes` is exactly
    /// [`RawFrame::SIZE`] long.
    pub fn from_bytes(bytes: &[u8]) -> FrameResult<Self> {
        bytemuck::try_pod_read_unaligned(bytes).map_err(|_| FrameError::BadRawSize(bytes.len()))
    }
}

impl Frame {
    /// Encodes this frame into its raw bus form.
    ///
    /// ```text
    ///   byte 0      1       2..6
    ///   intent      nonce   latency ms (BE)    press with timestamp
    ///   intent      nonce                      press
    ///   intent                                 idle, arm, presence
    /// ```
    #[must_use]
    pub fn encode(&self) -> RawFrame {
        let mut data = [0u8; MAX_PAYLOAD];
        data[0] = self.intent().code();
        let len = match self.body {
            FrameBody::Press {
                nonce,
                latency_ms: Some(latency),
            } => {
                data[1] = nonce;
                data[PRESS_LEN..PRESS_WITH_TIMESTAMP_LEN].copy_from_slice(&latency.to_be_bytes());
                PRESS_WITH_TIMESTAMP_LEN
            }
            FrameBody::Press {
                nonce,
                latency_ms: None,
            } => {
                data[1] = nonce;
                PRESS_LEN
            }
            FrameBody::Idle | FrameBody::Arm | FrameBody::Presence => INTENT_ONLY_LEN,
        };
        debug_assert!(len <= MAX_PAYLOAD);

        RawFrame {
            identifier: self.address.identifier(),
            // Out of range would decode as PayloadTooLong.
            len: u8::try_from(len).unwrap_or(u8::MAX),
            data,
            _padding: [0; 3],
        }
    }

    /// Decodes a raw bus frame.
    ///
    /// # Errors
    ///
    /// Returns a [`FrameError`] describing the first rule the frame breaks.
    pub fn decode(raw: &RawFrame) -> FrameResult<Self> {
        let len = usize::from(raw.len);
        if len > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(len));
        }
        if raw.identifier > MAX_IDENTIFIER {
            return Err(FrameError::UnknownAddress(raw.identifier));
        }
        let address = Address::from_identifier(raw.identifier)
            .ok_or(FrameError::UnknownAddress(raw.identifier))?;

        let payload = raw.payload();
        let code = *payload.first().ok_or(FrameError::EmptyPayload)?;
        let intent = Intent::from_code(code).ok_or(FrameError::UnknownIntent(code))?;

        let direction_ok = matches!(
            (address, intent),
            (Address::Broadcast, Intent::Idle)
                | (Address::ToPeripheral(_), Intent::Arm)
                | (Address::FromPeripheral(_), Intent::Press | Intent::Presence)
        );
        if !direction_ok {
            return Err(FrameError::UnexpectedIntent { address, intent });
        }

        let body = match intent {
            Intent::Idle | Intent::Arm | Intent::Presence => {
                if len != INTENT_ONLY_LEN {
                    return Err(FrameError::BadLength { intent, len });
                }
                match intent {
                    Intent::Idle => FrameBody::Idle,
                    Intent::Arm => FrameBody::Arm,
                    _ => FrameBody::Presence,
                }
            }
            Intent::Press => {
                let latency_ms = match len {
                    PRESS_LEN => None,
                    PRESS_WITH_TIMESTAMP_LEN => {
                        let tail = &payload[len - 4..];
                        Some(u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]))
                    }
                    _ => return Err(FrameError::BadLength { intent, len }),
                };
                FrameBody::Press {
                    nonce: payload[1],
                    latency_ms,
                }
            }
        };

        Ok(Self { address, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PeripheralId;

    #[test]
    fn test_raw_frame_size() {
        assert_eq!(std::mem::size_of::<RawFrame>(), RawFrame::SIZE);
    }

    #[test]
    fn test_press_timestamp_is_big_endian_tail() {
        let raw = Frame::press(PeripheralId(3), 7, Some(420)).encode();
        assert_eq!(raw.identifier, 0x003);
        assert_eq!(raw.payload(), &[0x02, 7, 0x00, 0x00, 0x01, 0xA4]);
    }

    #[test]
    fn test_arm_and_idle_layout() {
        let arm = Frame::arm(PeripheralId(2)).encode();
        assert_eq!(arm.identifier, 0x102);
        assert_eq!(arm.payload(), &[0x01]);

        let idle = Frame::idle().encode();
        assert_eq!(idle.identifier, 0x7FF);
        assert_eq!(idle.payload(), &[0x00]);
    }

    #[test]
    fn test_payload_length_per_layout() {
        let press = Frame::press(PeripheralId(4), 200, None).encode();
        assert_eq!(press.len, 2);
        assert_eq!(press.payload(), &[0x02, 200]);
        assert_eq!(&press.data[2..], &[0; 6]);

        let presence = Frame::presence(PeripheralId(4)).encode();
        assert_eq!(presence.len, 1);
        assert_eq!(presence.payload(), &[0x03]);

        let max = Frame::press(PeripheralId(4), 1, Some(u32::MAX)).encode();
        assert_eq!(usize::from(max.len), PRESS_WITH_TIMESTAMP_LEN);
        assert_eq!(Frame::decode(&max).unwrap(), Frame::press(PeripheralId(4), 1, Some(u32::MAX)));
    }

    #[test]
    fn test_decode_press_without_timestamp() {
        let raw = RawFrame::new(0x001, &[0x02, 9]).unwrap();
        let frame = Frame::decode(&raw).unwrap();
        assert_eq!(frame, Frame::press(PeripheralId(1), 9, None));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        let empty = RawFrame::new(0x001, &[]).unwrap();
        assert_eq!(Frame::decode(&empty), Err(FrameError::EmptyPayload));

        let unknown = RawFrame::new(0x001, &[0x44]).unwrap();
        assert_eq!(Frame::decode(&unknown), Err(FrameError::UnknownIntent(0x44)));

        let truncated = RawFrame::new(0x001, &[0x02, 1, 0, 0]).unwrap();
        assert!(matches!(
            Frame::decode(&truncated),
            Err(FrameError::BadLength {
                intent: Intent::Press,
                len: 4
            })
        ));

        // A peripheral may not claim to arm anybody.
        let spoofed = RawFrame::new(0x001, &[0x01]).unwrap();
        assert!(matches!(
            Frame::decode(&spoofed),
            Err(FrameError::UnexpectedIntent { .. })
        ));

        let mut oversized = RawFrame::new(0x001, &[0x03]).unwrap();
        oversized.len = 12;
        assert_eq!(Frame::decode(&oversized), Err(FrameError::PayloadTooLong(12)));
    }

    #[test]
    fn test_raw_bytes_from_adapter() {
        let raw = Frame::presence(PeripheralId(4)).encode();
        let copy = RawFrame::from_bytes(raw.as_bytes()).unwrap();
        assert_eq!(copy, raw);
        assert_eq!(RawFrame::from_bytes(&[0u8; 5]), Err(FrameError::BadRawSize(5)));
    }
}
