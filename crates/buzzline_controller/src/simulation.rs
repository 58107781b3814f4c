//! # Peripheral Simulation
//!
//! A fleet of simulated buzzers on the driver side of a [`BusEndpoint`],
//! for headless matches and soak tests.
//!
//! ## Features
//!
//! - Presence chatter on a fixed cadence
//! - Human-like reaction time after an arm frame
//! - Bus retransmission (duplicate press frames)
//! - Late timestamp delivery (press first, timestamp on a retransmission)
//! - False starts by peripherals that were not armed

use std::sync::Arc;

use buzzline_protocol::{Address, Frame, FrameBody, PeripheralId};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::clock::Timestamp;
use crate::transport::BusEndpoint;

/// Delay before a late timestamp follows its press.
const LATE_TIMESTAMP_DELAY_MS: u64 = 40;

/// Bus behaviour for simulation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusConditions {
    /// Presence frames lost (0-100).
    pub presence_loss_percent: u8,
    /// Press frames delivered twice (0-100).
    pub duplicate_percent: u8,
    /// Presses whose timestamp arrives on a later retransmission (0-100).
    pub late_timestamp_percent: u8,
    /// Chance per arm frame that each other peripheral presses (0-100).
    pub false_start_percent: u8,
}

impl BusConditions {
    /// Nothing goes wrong.
    pub const PERFECT: Self = Self {
        presence_loss_percent: 0,
        duplicate_percent: 0,
        late_timestamp_percent: 0,
        false_start_percent: 0,
    };

    /// A busy bus with jumpy players.
    pub const NOISY: Self = Self {
        presence_loss_percent: 5,
        duplicate_percent: 20,
        late_timestamp_percent: 25,
        false_start_percent: 10,
    };

    fn roll<R: Rng>(rng: &mut R, percent: u8) -> bool {
        percent > 0 && rng.gen_range(0..100u8) < percent
    }
}

impl Default for BusConditions {
    fn default() -> Self {
        Self::PERFECT
    }
}

/// Counters for what the fleet did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FleetStats {
    /// Presses sent by armed peripherals.
    pub presses: u64,
    /// Presses sent by peripherals that were not armed.
    pub false_starts: u64,
    /// Duplicate press frames.
    pub duplicates: u64,
    /// Timestamps delivered on a retransmission.
    pub late_timestamps: u64,
    /// Presence frames sent.
    pub presence_frames: u64,
}

#[derive(Debug)]
struct SimulatedPeripheral {
    id: PeripheralId,
    armed_at: Option<Timestamp>,
    press_at: Option<Timestamp>,
    late_timestamp: Option<(Timestamp, u8, u32)>,
    next_presence: Timestamp,
    nonce: u8,
}

/// Simulated buzzers.
pub struct PeripheralFleet {
    peripherals: Vec<SimulatedPeripheral>,
    conditions: BusConditions,
    rng: ChaCha8Rng,
    presence_interval_ms: u64,
    reaction_min_ms: u64,
    reaction_max_ms: u64,
    stats: Arc<Mutex<FleetStats>>,
}

impl PeripheralFleet {
    /// Creates a fleet with the default 250 ms presence cadence and
    /// 180-450 ms reaction time.
    pub fn new(
        ids: impl IntoIterator<Item = PeripheralId>,
        conditions: BusConditions,
        seed: u64,
    ) -> Self {
        Self {
            peripherals: ids
                .into_iter()
                .map(|id| SimulatedPeripheral {
                    id,
                    armed_at: None,
                    press_at: None,
                    late_timestamp: None,
                    next_presence: Timestamp::ZERO,
                    nonce: 0,
                })
                .collect(),
            conditions,
            rng: ChaCha8Rng::seed_from_u64(seed),
            presence_interval_ms: 250,
            reaction_min_ms: 180,
            reaction_max_ms: 450,
            stats: Arc::new(Mutex::new(FleetStats::default())),
        }
    }

    /// Overrides the reaction time range.
    #[must_use]
    pub fn with_reaction_ms(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.reaction_min_ms = min_ms;
        self.reaction_max_ms = max_ms.max(min_ms + 1);
        self
    }

    /// Shared view of the counters.
    #[must_use]
    pub fn stats_handle(&self) -> Arc<Mutex<FleetStats>> {
        Arc::clone(&self.stats)
    }

    /// Handles controller traffic and emits whatever is due at `now`.
    pub fn step(&mut self, endpoint: &BusEndpoint, now: Timestamp) {
        for frame in endpoint.drain_outbound_frames() {
            self.on_controller_frame(&frame, now);
        }

        let mut stats = FleetStats::default();
        for peripheral in &mut self.peripherals {
            if now >= peripheral.next_presence {
                peripheral.next_presence = now.plus_millis(self.presence_interval_ms);
                if !BusConditions::roll(&mut self.rng, self.conditions.presence_loss_percent) {
                    endpoint.deliver(&Frame::presence(peripheral.id));
                    stats.presence_frames += 1;
                }
            }

            if peripheral.press_at.is_some_and(|at| now >= at) {
                peripheral.press_at = None;
                peripheral.nonce = peripheral.nonce.wrapping_add(1);
                let nonce = peripheral.nonce;

                let latency = peripheral.armed_at.map(|armed_at| {
                    u32::try_from(now.millis_since(armed_at)).unwrap_or(u32::MAX)
                });
                match latency {
                    Some(_) => stats.presses += 1,
                    None => stats.false_starts += 1,
                }

                let late = latency.is_some()
                    && BusConditions::roll(&mut self.rng, self.conditions.late_timestamp_percent);
                let press = if late {
                    if let Some(latency) = latency {
                        peripheral.late_timestamp =
                            Some((now.plus_millis(LATE_TIMESTAMP_DELAY_MS), nonce, latency));
                    }
                    Frame::press(peripheral.id, nonce, None)
                } else {
                    Frame::press(peripheral.id, nonce, latency)
                };
                endpoint.deliver(&press);

                if BusConditions::roll(&mut self.rng, self.conditions.duplicate_percent) {
                    endpoint.deliver(&press);
                    stats.duplicates += 1;
                }
            }

            if let Some((at, nonce, latency)) = peripheral.late_timestamp {
                if now >= at {
                    peripheral.late_timestamp = None;
                    endpoint.deliver(&Frame::press(peripheral.id, nonce, Some(latency)));
                    stats.late_timestamps += 1;
                }
            }
        }

        let mut shared = self.stats.lock();
        shared.presses += stats.presses;
        shared.false_starts += stats.false_starts;
        shared.duplicates += stats.duplicates;
        shared.late_timestamps += stats.late_timestamps;
        shared.presence_frames += stats.presence_frames;
    }

    fn on_controller_frame(&mut self, frame: &Frame, now: Timestamp) {
        match (frame.address, frame.body) {
            (Address::ToPeripheral(target), FrameBody::Arm) => {
                let Some(index) = self.peripherals.iter().position(|p| p.id == target) else {
                    return;
                };
                // Re-announcements of an arm already seen change nothing.
                if self.peripherals[index].armed_at.is_some() {
                    return;
                }

                let reaction = self.rng.gen_range(self.reaction_min_ms..self.reaction_max_ms);
                let armed = &mut self.peripherals[index];
                armed.armed_at = Some(now);
                armed.press_at = Some(now.plus_millis(reaction));

                for other in self.peripherals.iter_mut().filter(|p| p.id != target) {
                    if BusConditions::roll(&mut self.rng, self.conditions.false_start_percent) {
                        let jump = self.rng.gen_range(0..self.reaction_min_ms.max(1));
                        other.press_at = Some(now.plus_millis(jump));
                    }
                }
            }
            (Address::Broadcast, FrameBody::Idle) => {
                for peripheral in &mut self.peripherals {
                    peripheral.armed_at = None;
                    peripheral.press_at = None;
                }
            }
            _ => {}
        }
    }
}
