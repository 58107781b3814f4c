//! # Buzzline Controller - The Referee
//!
//! Game sequencing and bus arbitration for a multiplayer reaction-time
//! buzzer game. One controller, a handful of buzzer peripherals, one shared
//! broadcast bus.
//!
//! ## Architecture
//!
//! - **Registry**: per-buzzer identity, eligibility and round flags
//! - **Presence**: online iff a frame arrived within the liveness window,
//!   computed on demand
//! - **Arbitrator**: random selection, randomized arming delay, first valid
//!   press wins, penalties for out-of-turn presses
//! - **Sequencer**: the match state machine
//! - **Transport**: frames in and out, faults reported in-band
//!
//! ## Threading
//!
//! ```text
//!  bus driver thread            tick loop thread
//!  ─────────────────            ────────────────
//!  ReceivePath ──[queue]──────► Controller::tick(now)
//!      │                          ├─ operator commands
//!      └──► LatencyBoard ◄────────├─ presence
//!           (AtomicU64)           ├─ inbound frames
//!                                 └─ sequencer step
//! ```
//!
//! Only the latency board is touched from both sides. Everything else is
//! owned by the tick loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use buzzline_controller::{
//!     ChannelBus, Controller, LatencyBoard, MatchConfig, MonotonicClock, Clock,
//!     RandomArming, TracingDisplay,
//! };
//!
//! let config = MatchConfig::load("buzzline.toml")?;
//! let board = Arc::new(LatencyBoard::new(config.peripheral_ids()));
//! let (bus, endpoint) = ChannelBus::pair(64, Arc::clone(&board));
//! let policy = Box::new(RandomArming::from_config(&config));
//! let (mut controller, operator) =
//!     Controller::new(&config, bus, TracingDisplay::default(), board, policy);
//!
//! let clock = MonotonicClock::new();
//! operator.start();
//! loop {
//!     controller.tick(clock.now());
//! }
//! ```

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod arbitrator;
pub mod clock;
pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod latency;
pub mod operator;
pub mod registry;
pub mod sequencer;
pub mod simulation;
pub mod tick;
pub mod transport;

pub use arbitrator::{
    ArmingPolicy, ArmingProgress, IdleBeacon, RaceOutcome, RandomArming, RoundArbitrator,
    RoundResult, RoundState, ScriptedArming,
};
pub use clock::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use config::{MatchConfig, PeripheralConfig};
pub use controller::{Controller, TickReport};
pub use display::{DigitReadout, Display, DisplayEvent, RecordingDisplay, Rgb, TracingDisplay};
pub use error::{ArbitrationError, ConfigError, ConfigResult, TransportError};
pub use latency::{LatencyBoard, LatencyCell, LATENCY_SLOTS};
pub use operator::{operator_channel, OperatorCommand, OperatorHandle};
pub use registry::{
    LatencySource, PendingPress, Peripheral, PeripheralRegistry, PresenceChange, PressDisposition,
    PressLatency, PressOrigin,
};
pub use sequencer::{GameSequencer, GameState, MatchSummary};
pub use simulation::{BusConditions, FleetStats, PeripheralFleet};
pub use tick::{TickLoop, TickStats, MAX_CATCH_UP_TICKS};
pub use transport::{
    BusAlert, BusEndpoint, BusEvent, BusTransport, ChannelBus, ChannelInbound, ReceivePath,
    TransportStats,
};
