//! # Controller
//!
//! Wires the registry, sequencer, bus and display into one tick.
//!
//! ## Tick order
//!
//! 1. Drain operator commands (abort takes effect here, never mid-tick)
//! 2. Recompute presence, so a peripheral that just lapsed cannot be armed
//! 3. Drain inbound bus events into the registry
//! 4. Flush the inbound queue after an overflow alert
//! 5. Step the sequencer

use std::sync::Arc;

use buzzline_protocol::{FrameBody, PeripheralId};
use crossbeam_channel::Receiver;

use crate::arbitrator::ArmingPolicy;
use crate::clock::Timestamp;
use crate::config::MatchConfig;
use crate::display::Display;
use crate::latency::LatencyBoard;
use crate::operator::{operator_channel, OperatorCommand, OperatorHandle};
use crate::registry::{PeripheralRegistry, PresenceChange, PressDisposition};
use crate::sequencer::{GameSequencer, GameState};
use crate::transport::{BusAlert, BusEvent, BusTransport, TransportStats};

/// Operator command queue depth.
const OPERATOR_QUEUE_CAPACITY: usize = 16;

/// What happened during one [`Controller::tick`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Presence edges observed this tick.
    pub presence_changes: Vec<PresenceChange>,
    /// Frames drained from the bus.
    pub frames: usize,
    /// Alerts drained from the bus.
    pub alerts: usize,
    /// Presses queued for arbitration.
    pub presses_accepted: usize,
    /// Operator commands that applied.
    pub commands_applied: usize,
}

/// The buzzer game controller.
pub struct Controller<B: BusTransport, D: Display> {
    registry: PeripheralRegistry,
    sequencer: GameSequencer,
    bus: B,
    display: D,
    board: Arc<LatencyBoard>,
    commands: Receiver<OperatorCommand>,
    tick_count: u64,
}

impl<B: BusTransport, D: Display> Controller<B, D> {
    /// Builds a controller for `config`.
    ///
    /// `board` must be the board the bus receive path publishes to.
    pub fn new(
        config: &MatchConfig,
        bus: B,
        display: D,
        board: Arc<LatencyBoard>,
        policy: Box<dyn ArmingPolicy>,
    ) -> (Self, OperatorHandle) {
        let mut registry =
            PeripheralRegistry::new(config.liveness_window_ms, config.trust_press_without_liveness);
        for peripheral in &config.peripherals {
            registry.register_peripheral(peripheral.peripheral_id(), peripheral.eligible);
        }
        let (handle, commands) = operator_channel(OPERATOR_QUEUE_CAPACITY);

        tracing::info!(
            peripherals = registry.len(),
            rounds = config.total_rounds,
            "controller ready"
        );

        let controller = Self {
            registry,
            sequencer: GameSequencer::new(config, policy),
            bus,
            display,
            board,
            commands,
            tick_count: 0,
        };
        (controller, handle)
    }

    /// Runs one tick at `now`.
    pub fn tick(&mut self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        self.tick_count += 1;

        let Self {
            registry,
            sequencer,
            bus,
            display,
            board,
            commands,
            ..
        } = self;

        for command in commands.try_iter() {
            if sequencer.handle_command(command, registry, bus, display, now) {
                report.commands_applied += 1;
            }
        }

        report.presence_changes = registry.refresh_presence(now);

        let accepts_presses = sequencer.accepts_presses();
        let mut flush = false;
        for event in bus.poll_inbound() {
            match event {
                BusEvent::Frame(frame) => {
                    report.frames += 1;
                    let Some(id) = frame.sender() else {
                        continue;
                    };
                    if let Some(change) = registry.on_frame_received(&frame, now) {
                        report.presence_changes.push(change);
                    }
                    if let FrameBody::Press { nonce, .. } = frame.body {
                        if !accepts_presses {
                            tracing::trace!(
                                peripheral = %id,
                                nonce,
                                state = ?sequencer.state(),
                                "press outside a round ignored"
                            );
                            continue;
                        }
                        if registry.record_press(id, nonce, now) == PressDisposition::Accepted {
                            report.presses_accepted += 1;
                        }
                    }
                }
                BusEvent::Alert(alert) => {
                    report.alerts += 1;
                    tracing::warn!(?alert, "bus alert");
                    flush |= matches!(alert, BusAlert::RxQueueFull { .. });
                }
            }
        }
        if flush {
            let dropped = bus.flush();
            tracing::warn!(dropped, "inbound queue flushed after overflow");
        }

        sequencer.step(registry, bus, display, board, now);
        report
    }

    /// Changes a peripheral's match participation.
    pub fn set_eligible(&mut self, id: PeripheralId, eligible: bool) -> bool {
        self.registry.set_eligible(id, eligible)
    }

    /// Presence query.
    #[must_use]
    pub fn is_online(&self, id: PeripheralId, now: Timestamp) -> bool {
        self.registry.is_online(id, now)
    }

    /// Current sequencer state.
    #[must_use]
    pub const fn state(&self) -> GameState {
        self.sequencer.state()
    }

    /// The sequencer.
    #[must_use]
    pub const fn sequencer(&self) -> &GameSequencer {
        &self.sequencer
    }

    /// The registry.
    #[must_use]
    pub const fn registry(&self) -> &PeripheralRegistry {
        &self.registry
    }

    /// The display.
    #[must_use]
    pub const fn display(&self) -> &D {
        &self.display
    }

    /// Bus counters.
    #[must_use]
    pub fn transport_stats(&self) -> TransportStats {
        self.bus.stats()
    }

    /// Ticks run so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }
}
