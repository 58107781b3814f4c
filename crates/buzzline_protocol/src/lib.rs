//! # Buzzline Protocol - The Wire
//!
//! Frame definitions and codec for the shared broadcast bus connecting the
//! game controller with its buzzer peripherals.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Identifier (11 bit)                                          │
//! │   0x001..=0x0FF  peripheral -> controller (sender id)        │
//! │   0x101..=0x1FF  controller -> peripheral (id | 0x100)       │
//! │   0x7FF          controller broadcast                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (0..=8 bytes)                                        │
//! │   [0]      intent code                                       │
//! │   [1]      press nonce (press only)                          │
//! │   tail 4   big-endian latency in ms (press only, optional)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Design Philosophy
//!
//! - Every frame fits a single classic bus frame (8 data bytes)
//! - Decoding is strict: anything unexpected is a [`FrameError`]
//! - Callers decide what to do with malformed input (the controller drops it)

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod codec;
pub mod constants;
pub mod frame;

pub use codec::{FrameError, FrameResult, RawFrame};
pub use constants::{
    BROADCAST_ADDRESS, MAX_IDENTIFIER, MAX_PAYLOAD, TO_PERIPHERAL_OFFSET,
};
pub use frame::{Address, Frame, FrameBody, Intent, PeripheralId};
