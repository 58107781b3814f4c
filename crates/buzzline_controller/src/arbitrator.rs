//! # Round Arbitrator
//!
//! Runs a single round: selection, randomized arming delay, arming, and
//! the first-valid-press-wins race.
//!
//! ## Design
//!
//! ```text
//!  begin_round ──► chosen, deadline = now + delay
//!       │
//!  poll_arming ──► Waiting ... (re-select if the choice drops out)
//!       │
//!       └────────► Armed: arm frame, round_start_clock = now
//!                    │
//!  resolve ──────────┴─► penalties for out-of-turn presses
//!                        Won on the armed peripheral's first press
//! ```
//!
//! Randomness sits behind [`ArmingPolicy`] so rounds can be scripted.

use std::collections::VecDeque;

use buzzline_protocol::{Frame, PeripheralId};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::clock::Timestamp;
use crate::config::MatchConfig;
use crate::error::ArbitrationError;
use crate::latency::LatencyBoard;
use crate::registry::{PeripheralRegistry, PressLatency, PressOrigin};
use crate::transport::{send_or_log, BusTransport};

/// Source of selection and delay decisions.
pub trait ArmingPolicy: Send {
    /// Chooses one of `candidates` (never empty).
    fn pick(&mut self, candidates: &[PeripheralId]) -> Option<PeripheralId>;

    /// Chooses a delay in `min_ms..max_ms`.
    fn arming_delay_ms(&mut self, min_ms: u32, max_ms: u32) -> u32;
}

/// Uniform random policy.
#[derive(Debug)]
pub struct RandomArming<R = ChaCha8Rng> {
    rng: R,
}

impl RandomArming<ChaCha8Rng> {
    /// Deterministic policy for replays.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Policy seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
        }
    }

    /// Seeded from `rng_seed` when configured.
    #[must_use]
    pub fn from_config(config: &MatchConfig) -> Self {
        config.rng_seed.map_or_else(Self::from_entropy, Self::seeded)
    }
}

impl<R: Rng + Send> RandomArming<R> {
    /// Wraps an arbitrary generator.
    pub const fn with_rng(rng: R) -> Self {
        Self { rng }
    }
}

impl<R: Rng + Send> ArmingPolicy for RandomArming<R> {
    fn pick(&mut self, candidates: &[PeripheralId]) -> Option<PeripheralId> {
        candidates.choose(&mut self.rng).copied()
    }

    fn arming_delay_ms(&mut self, min_ms: u32, max_ms: u32) -> u32 {
        if min_ms >= max_ms {
            return min_ms;
        }
        self.rng.gen_range(min_ms..max_ms)
    }
}

/// Replays a fixed list of selections with a constant delay.
///
/// A scripted id that is not currently a candidate falls back to the first
/// candidate.
#[derive(Clone, Debug, Default)]
pub struct ScriptedArming {
    picks: VecDeque<PeripheralId>,
    delay_ms: u32,
}

impl ScriptedArming {
    /// Creates a script.
    pub fn new(picks: impl IntoIterator<Item = PeripheralId>, delay_ms: u32) -> Self {
        Self {
            picks: picks.into_iter().collect(),
            delay_ms,
        }
    }
}

impl ArmingPolicy for ScriptedArming {
    fn pick(&mut self, candidates: &[PeripheralId]) -> Option<PeripheralId> {
        match self.picks.pop_front() {
            Some(id) if candidates.contains(&id) => Some(id),
            _ => candidates.first().copied(),
        }
    }

    fn arming_delay_ms(&mut self, _min_ms: u32, _max_ms: u32) -> u32 {
        self.delay_ms
    }
}

/// State of the round in progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundState {
    /// 1-based round number.
    pub round_number: u8,
    /// Peripheral selected for arming.
    pub chosen: PeripheralId,
    /// Set once the arming deadline has passed.
    pub armed_peripheral: Option<PeripheralId>,
    /// No press is legal before this instant.
    pub arming_deadline: Timestamp,
    /// Zero point for latency measurement.
    pub round_start_clock: Option<Timestamp>,
    /// Out-of-turn presses this round.
    pub penalties: u32,
}

/// Result of [`RoundArbitrator::poll_arming`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmingProgress {
    /// Deadline not reached.
    Waiting,
    /// Peripheral armed this tick.
    Armed(PeripheralId),
}

/// A closed round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundResult {
    /// Round that closed.
    pub round_number: u8,
    /// Armed peripheral that pressed.
    pub winner: PeripheralId,
    /// Scored latency.
    pub latency: PressLatency,
    /// Nonce of the scoring press, for bus presses.
    pub nonce: Option<u8>,
    /// Out-of-turn presses during the round.
    pub penalties: u32,
}

/// Result of [`RoundArbitrator::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RaceOutcome {
    /// Still waiting for the armed peripheral.
    Pending,
    /// Round closed.
    Won(RoundResult),
}

/// Runs rounds against the registry.
pub struct RoundArbitrator {
    policy: Box<dyn ArmingPolicy>,
    delay_min_ms: u32,
    delay_max_ms: u32,
    penalty_ms: u32,
    require_online: bool,
}

impl RoundArbitrator {
    /// Creates an arbitrator.
    #[must_use]
    pub fn new(config: &MatchConfig, policy: Box<dyn ArmingPolicy>) -> Self {
        Self {
            policy,
            delay_min_ms: config.arming_delay_min_ms,
            delay_max_ms: config.arming_delay_max_ms,
            penalty_ms: config.penalty_ms,
            require_online: config.require_online_for_arming,
        }
    }

    /// Fixed penalty per out-of-turn press.
    #[inline]
    #[must_use]
    pub const fn penalty_ms(&self) -> u32 {
        self.penalty_ms
    }

    /// Resets round flags, selects a peripheral and schedules arming.
    ///
    /// # Errors
    ///
    /// [`ArbitrationError::NoEligiblePeripherals`] if nobody takes part in
    /// the match, [`ArbitrationError::NoOnlinePeripherals`] if arming
    /// requires liveness and no eligible peripheral is online.
    pub fn begin_round(
        &mut self,
        round_number: u8,
        registry: &mut PeripheralRegistry,
        now: Timestamp,
    ) -> Result<RoundState, ArbitrationError> {
        registry.reset_round_flags();
        let (chosen, arming_deadline) = self.select(registry, now)?;
        tracing::info!(
            round = round_number,
            peripheral = %chosen,
            delay_ms = arming_deadline.millis_since(now),
            "round started"
        );
        Ok(RoundState {
            round_number,
            chosen,
            armed_peripheral: None,
            arming_deadline,
            round_start_clock: None,
            penalties: 0,
        })
    }

    fn select(
        &mut self,
        registry: &PeripheralRegistry,
        now: Timestamp,
    ) -> Result<(PeripheralId, Timestamp), ArbitrationError> {
        let candidates = registry.arming_candidates(now, self.require_online);
        if candidates.is_empty() {
            return Err(match registry.eligible_count() {
                0 => ArbitrationError::NoEligiblePeripherals,
                eligible => ArbitrationError::NoOnlinePeripherals { eligible },
            });
        }
        let chosen = self
            .policy
            .pick(&candidates)
            .ok_or(ArbitrationError::NoEligiblePeripherals)?;
        let delay = self.policy.arming_delay_ms(self.delay_min_ms, self.delay_max_ms);
        Ok((chosen, now.plus_millis(u64::from(delay))))
    }

    /// Arms the chosen peripheral once the deadline has passed.
    ///
    /// If the chosen peripheral stopped being a candidate before its
    /// deadline, a new one is selected with a fresh delay.
    ///
    /// # Errors
    ///
    /// As for [`Self::begin_round`], if re-selection finds nobody.
    pub fn poll_arming<B: BusTransport>(
        &mut self,
        round: &mut RoundState,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        now: Timestamp,
    ) -> Result<ArmingProgress, ArbitrationError> {
        if round.armed_peripheral.is_some() {
            return Ok(ArmingProgress::Waiting);
        }

        let candidates = registry.arming_candidates(now, self.require_online);
        if !candidates.contains(&round.chosen) {
            let dropped = round.chosen;
            let (chosen, deadline) = self.select(registry, now)?;
            tracing::warn!(
                round = round.round_number,
                dropped = %dropped,
                peripheral = %chosen,
                "selected peripheral unavailable, re-selecting"
            );
            round.chosen = chosen;
            round.arming_deadline = deadline;
            return Ok(ArmingProgress::Waiting);
        }

        if now < round.arming_deadline {
            return Ok(ArmingProgress::Waiting);
        }

        registry.arm(round.chosen);
        round.armed_peripheral = Some(round.chosen);
        round.round_start_clock = Some(now);
        send_or_log(bus, &Frame::arm(round.chosen));
        tracing::info!(round = round.round_number, peripheral = %round.chosen, "peripheral armed");
        Ok(ArmingProgress::Armed(round.chosen))
    }

    /// Processes pending presses in arrival order.
    ///
    /// Each out-of-turn press adds the penalty to `accumulated_ms`. The
    /// first press by the armed peripheral made while armed closes the
    /// round; its latency comes from the peripheral's timestamp when the
    /// board holds one for that nonce, else from the local clock.
    pub fn resolve(
        &self,
        round: &mut RoundState,
        registry: &mut PeripheralRegistry,
        board: &LatencyBoard,
        accumulated_ms: &mut u64,
    ) -> RaceOutcome {
        let (Some(armed), Some(start)) = (round.armed_peripheral, round.round_start_clock) else {
            return RaceOutcome::Pending;
        };

        for press in registry.take_pending_presses() {
            if press.id != armed || !press.while_armed {
                round.penalties += 1;
                *accumulated_ms += u64::from(self.penalty_ms);
                tracing::info!(
                    round = round.round_number,
                    peripheral = %press.id,
                    penalty_ms = self.penalty_ms,
                    accumulated_ms = *accumulated_ms,
                    "out-of-turn press penalized"
                );
                continue;
            }

            let local_ms = u32::try_from(press.received_at.millis_since(start)).unwrap_or(u32::MAX);
            let (latency, nonce) = match press.origin {
                PressOrigin::Bus { nonce } => {
                    let latency = board
                        .take(press.id, nonce)
                        .map_or(PressLatency::provisional(local_ms), PressLatency::peripheral);
                    (latency, Some(nonce))
                }
                PressOrigin::Operator => (PressLatency::operator(local_ms), None),
            };

            registry.set_press_latency(press.id, latency);
            *accumulated_ms += u64::from(latency.ms);
            tracing::info!(
                round = round.round_number,
                peripheral = %press.id,
                latency_ms = latency.ms,
                source = ?latency.source,
                accumulated_ms = *accumulated_ms,
                "round won"
            );
            return RaceOutcome::Won(RoundResult {
                round_number: round.round_number,
                winner: press.id,
                latency,
                nonce,
                penalties: round.penalties,
            });
        }

        RaceOutcome::Pending
    }
}

/// Fixed-cadence broadcast timer.
#[derive(Clone, Copy, Debug)]
pub struct IdleBeacon {
    interval_ms: u64,
    next_at: Timestamp,
}

impl IdleBeacon {
    /// Creates a beacon that fires on its first check.
    #[must_use]
    pub const fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            next_at: Timestamp::ZERO,
        }
    }

    /// True once per interval.
    pub fn due(&mut self, now: Timestamp) -> bool {
        if now < self.next_at {
            return false;
        }
        self.next_at = now.plus_millis(self.interval_ms);
        true
    }

    /// Restarts the interval from `now` without firing.
    pub fn restart(&mut self, now: Timestamp) {
        self.next_at = now.plus_millis(self.interval_ms);
    }
}
