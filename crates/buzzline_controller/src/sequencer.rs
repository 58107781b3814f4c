//! # Game Sequencer
//!
//! Top-level match state machine. Owns every round-scoped field; nothing
//! here is shared with another thread.
//!
//! ```text
//!   Idle ──start──► ReadyCountdown ──► Preparing ──► RoundStart ◄─────────┐
//!    ▲                                                 │   │               │
//!    │                                      no buzzers │   ▼               │
//!    │                                                 │ ArmingWait ──► RaceWait
//!    │                                                 ▼                   (won)
//!    └──────────acknowledge────────────────────── MatchFinished
//!
//!   abort: any in-round state ──► Idle
//! ```
//!
//! Every state returns within the tick. The countdown is a timed state
//! measured against the tick's `now`.

use buzzline_protocol::{Frame, PeripheralId};

use crate::arbitrator::{
    ArmingPolicy, ArmingProgress, IdleBeacon, RaceOutcome, RoundArbitrator, RoundResult, RoundState,
};
use crate::clock::Timestamp;
use crate::config::MatchConfig;
use crate::display::{DigitReadout, Display, Rgb};
use crate::error::ArbitrationError;
use crate::latency::LatencyBoard;
use crate::operator::OperatorCommand;
use crate::registry::{LatencySource, PeripheralRegistry};
use crate::transport::{send_or_log, BusTransport};

const MSG_GO: &str = "Go!";
const MSG_NO_BUZZERS: &str = "No buzzers available!";
const MSG_NO_BUZZERS_ONLINE: &str = "No buzzers online!";
const MSG_MATCH_FINISHED: &str = "Match finished!";
const MSG_ABORTED: &str = "Game aborted";

/// Sequencer states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GameState {
    /// Waiting for the operator.
    Idle,
    /// Pre-match countdown; peripheral input is not game input.
    ReadyCountdown,
    /// Resetting match counters.
    Preparing,
    /// Selecting the next round's peripheral.
    RoundStart,
    /// Randomized delay before arming.
    ArmingWait,
    /// Armed; waiting for the first valid press.
    RaceWait,
    /// Final score shown until acknowledged.
    MatchFinished,
}

impl GameState {
    /// States an abort applies to.
    #[must_use]
    pub const fn is_in_match(self) -> bool {
        matches!(
            self,
            Self::ReadyCountdown
                | Self::Preparing
                | Self::RoundStart
                | Self::ArmingWait
                | Self::RaceWait
        )
    }
}

/// Outcome of a finished match.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatchSummary {
    /// Rounds closed by a valid press.
    pub rounds_completed: u8,
    /// Final score, lower is better.
    pub accumulated_ms: u64,
    /// Out-of-turn presses over the match.
    pub penalties: u32,
    /// Ended because nobody could be armed.
    pub finished_early: bool,
}

/// Score awaiting the authoritative timestamp of a provisionally scored
/// press.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PendingCorrection {
    id: PeripheralId,
    nonce: u8,
    provisional_ms: u32,
}

/// The match state machine.
pub struct GameSequencer {
    state: GameState,
    state_entered_at: Timestamp,
    total_rounds: u8,
    countdown_steps: u8,
    countdown_step_ms: u64,
    countdown_shown: u8,
    round_number: u8,
    rounds_won: u8,
    accumulated_ms: u64,
    penalties: u32,
    round: Option<RoundState>,
    arbitrator: RoundArbitrator,
    beacon: IdleBeacon,
    corrections: Vec<PendingCorrection>,
    last_result: Option<RoundResult>,
    summary: Option<MatchSummary>,
}

impl GameSequencer {
    /// Creates a sequencer in [`GameState::Idle`].
    #[must_use]
    pub fn new(config: &MatchConfig, policy: Box<dyn ArmingPolicy>) -> Self {
        Self {
            state: GameState::Idle,
            state_entered_at: Timestamp::ZERO,
            total_rounds: config.total_rounds,
            countdown_steps: config.countdown_steps,
            countdown_step_ms: config.countdown_step_ms,
            countdown_shown: 0,
            round_number: 0,
            rounds_won: 0,
            accumulated_ms: 0,
            penalties: 0,
            round: None,
            arbitrator: RoundArbitrator::new(config, policy),
            beacon: IdleBeacon::new(config.idle_broadcast_interval_ms),
            corrections: Vec::new(),
            last_result: None,
            summary: None,
        }
    }

    /// Current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> GameState {
        self.state
    }

    /// When the current state was entered.
    #[inline]
    #[must_use]
    pub const fn state_entered_at(&self) -> Timestamp {
        self.state_entered_at
    }

    /// Current 1-based round, 0 before the first round.
    #[inline]
    #[must_use]
    pub const fn round_number(&self) -> u8 {
        self.round_number
    }

    /// Score so far.
    #[inline]
    #[must_use]
    pub const fn accumulated_ms(&self) -> u64 {
        self.accumulated_ms
    }

    /// Round in progress.
    #[must_use]
    pub const fn current_round(&self) -> Option<&RoundState> {
        self.round.as_ref()
    }

    /// Most recently closed round.
    #[must_use]
    pub const fn last_result(&self) -> Option<&RoundResult> {
        self.last_result.as_ref()
    }

    /// Summary of the last finished match.
    #[must_use]
    pub const fn summary(&self) -> Option<&MatchSummary> {
        self.summary.as_ref()
    }

    /// Provisional scores still waiting for a timestamp.
    #[must_use]
    pub fn pending_corrections(&self) -> usize {
        self.corrections.len()
    }

    /// Whether press frames count as game input right now.
    ///
    /// Presses during [`GameState::ArmingWait`] are recorded so they can be
    /// penalized once the race opens.
    #[must_use]
    pub const fn accepts_presses(&self) -> bool {
        matches!(self.state, GameState::ArmingWait | GameState::RaceWait)
    }

    fn enter(&mut self, next: GameState, now: Timestamp) {
        tracing::info!(
            from = ?self.state,
            to = ?next,
            round = self.round_number,
            "game state transition"
        );
        self.state = next;
        self.state_entered_at = now;
    }

    /// Applies an operator command. Returns false if the command does not
    /// apply to the current state.
    pub fn handle_command<B: BusTransport, D: Display>(
        &mut self,
        command: OperatorCommand,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        display: &mut D,
        now: Timestamp,
    ) -> bool {
        match (command, self.state) {
            (OperatorCommand::Start, GameState::Idle) => {
                self.summary = None;
                self.last_result = None;
                self.countdown_shown = 0;
                if self.countdown_steps > 0 {
                    display.show_digits(DigitReadout::Countdown(self.countdown_steps));
                    display.show_message(countdown_message(0, self.countdown_steps));
                }
                self.enter(GameState::ReadyCountdown, now);
                true
            }
            (OperatorCommand::Abort, state) if state.is_in_match() => {
                self.abort(registry, bus, display, now);
                true
            }
            (OperatorCommand::Acknowledge, GameState::MatchFinished) => {
                self.reset_match();
                display.show_digits(DigitReadout::Blank);
                display.show_message("");
                display.set_accent_color(Rgb::BRAND_RED);
                self.enter(GameState::Idle, now);
                true
            }
            (OperatorCommand::SimulatedPress, GameState::RaceWait) => {
                match self.round.and_then(|round| round.armed_peripheral) {
                    Some(id) => registry.record_operator_press(id, now),
                    None => false,
                }
            }
            (command, state) => {
                tracing::debug!(?command, ?state, "operator command ignored");
                false
            }
        }
    }

    fn abort<B: BusTransport, D: Display>(
        &mut self,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        display: &mut D,
        now: Timestamp,
    ) {
        tracing::info!(
            round = self.round_number,
            discarded_ms = self.accumulated_ms,
            "match aborted"
        );
        self.reset_match();
        registry.reset_round_flags();
        send_or_log(bus, &Frame::idle());
        self.beacon.restart(now);
        display.show_digits(DigitReadout::Blank);
        display.show_message(MSG_ABORTED);
        display.set_accent_color(Rgb::BRAND_RED);
        self.enter(GameState::Idle, now);
    }

    fn reset_match(&mut self) {
        self.round_number = 0;
        self.rounds_won = 0;
        self.accumulated_ms = 0;
        self.penalties = 0;
        self.round = None;
        self.corrections.clear();
    }

    /// Advances the state machine by one tick.
    ///
    /// Applies provisional corrections, emits the periodic broadcast, then
    /// makes at most one state transition.
    pub fn step<B: BusTransport, D: Display>(
        &mut self,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        display: &mut D,
        board: &LatencyBoard,
        now: Timestamp,
    ) {
        self.apply_corrections(board, display);
        self.broadcast(bus, now);

        match self.state {
            GameState::Idle | GameState::MatchFinished => {}
            GameState::ReadyCountdown => self.step_countdown(display, now),
            GameState::Preparing => {
                self.reset_match();
                board.clear_all();
                display.show_digits(DigitReadout::elapsed(0));
                display.set_accent_color(Rgb::BRAND_RED);
                self.enter(GameState::RoundStart, now);
            }
            GameState::RoundStart => self.step_round_start(registry, display, now),
            GameState::ArmingWait => self.step_arming(registry, bus, display, now),
            GameState::RaceWait => self.step_race(registry, bus, display, board, now),
        }
    }

    fn broadcast<B: BusTransport>(&mut self, bus: &mut B, now: Timestamp) {
        if !self.beacon.due(now) {
            return;
        }
        let frame = match (self.state, self.round.and_then(|round| round.armed_peripheral)) {
            (GameState::ArmingWait, _) => return,
            (GameState::RaceWait, Some(armed)) => Frame::arm(armed),
            _ => Frame::idle(),
        };
        send_or_log(bus, &frame);
    }

    fn step_countdown<D: Display>(&mut self, display: &mut D, now: Timestamp) {
        let elapsed = now.millis_since(self.state_entered_at);
        let step = elapsed / self.countdown_step_ms.max(1);

        if step >= u64::from(self.countdown_steps) {
            display.show_digits(DigitReadout::Blank);
            display.show_message(MSG_GO);
            self.enter(GameState::Preparing, now);
            return;
        }

        let step = u8::try_from(step).unwrap_or(self.countdown_steps);
        if step > self.countdown_shown {
            self.countdown_shown = step;
            display.show_digits(DigitReadout::Countdown(self.countdown_steps - step));
            display.show_message(countdown_message(step, self.countdown_steps));
        }
    }

    fn step_round_start<D: Display>(
        &mut self,
        registry: &mut PeripheralRegistry,
        display: &mut D,
        now: Timestamp,
    ) {
        if self.round_number >= self.total_rounds {
            display.show_message(MSG_MATCH_FINISHED);
            self.finish(display, now, false);
            return;
        }

        match self.arbitrator.begin_round(self.round_number + 1, registry, now) {
            Ok(round) => {
                self.round_number = round.round_number;
                self.round = Some(round);
                display.show_message(&format!("Round {}", self.round_number));
                display.set_accent_color(Rgb::BRAND_YELLOW);
                self.enter(GameState::ArmingWait, now);
            }
            Err(err) => {
                tracing::warn!(error = %err, round = self.round_number, "match ended early");
                display.show_message(unavailable_message(err));
                self.finish(display, now, true);
            }
        }
    }

    fn step_arming<B: BusTransport, D: Display>(
        &mut self,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        display: &mut D,
        now: Timestamp,
    ) {
        let Some(round) = self.round.as_mut() else {
            self.enter(GameState::RoundStart, now);
            return;
        };

        match self.arbitrator.poll_arming(round, registry, bus, now) {
            Ok(ArmingProgress::Waiting) => {}
            Ok(ArmingProgress::Armed(id)) => {
                self.beacon.restart(now);
                display.show_message(&format!("Buzzer {} !!!", id.get()));
                self.enter(GameState::RaceWait, now);
            }
            Err(err) => {
                tracing::warn!(error = %err, round = self.round_number, "match ended early");
                registry.disarm_all();
                display.show_message(unavailable_message(err));
                self.finish(display, now, true);
            }
        }
    }

    fn step_race<B: BusTransport, D: Display>(
        &mut self,
        registry: &mut PeripheralRegistry,
        bus: &mut B,
        display: &mut D,
        board: &LatencyBoard,
        now: Timestamp,
    ) {
        let Some(round) = self.round.as_mut() else {
            self.enter(GameState::RoundStart, now);
            return;
        };

        match self.arbitrator.resolve(round, registry, board, &mut self.accumulated_ms) {
            RaceOutcome::Pending => {
                let running = round
                    .round_start_clock
                    .map_or(0, |start| now.millis_since(start));
                display.show_digits(DigitReadout::elapsed(self.accumulated_ms + running));
                display.set_accent_color(Rgb::urgency_pulse(now));
            }
            RaceOutcome::Won(result) => {
                self.rounds_won += 1;
                self.penalties += result.penalties;
                if let (LatencySource::Provisional, Some(nonce)) =
                    (result.latency.source, result.nonce)
                {
                    self.corrections.push(PendingCorrection {
                        id: result.winner,
                        nonce,
                        provisional_ms: result.latency.ms,
                    });
                }
                self.last_result = Some(result);
                self.round = None;

                registry.disarm_all();
                send_or_log(bus, &Frame::idle());
                self.beacon.restart(now);
                display.show_digits(DigitReadout::elapsed(self.accumulated_ms));
                self.enter(GameState::RoundStart, now);
            }
        }
    }

    fn finish<D: Display>(&mut self, display: &mut D, now: Timestamp, early: bool) {
        self.round = None;
        let summary = MatchSummary {
            rounds_completed: self.rounds_won,
            accumulated_ms: self.accumulated_ms,
            penalties: self.penalties,
            finished_early: early,
        };
        tracing::info!(
            rounds = summary.rounds_completed,
            accumulated_ms = summary.accumulated_ms,
            penalties = summary.penalties,
            early,
            "match finished"
        );
        self.summary = Some(summary);
        display.show_digits(DigitReadout::elapsed(self.accumulated_ms));
        display.set_accent_color(Rgb::BRAND_YELLOW);
        self.enter(GameState::MatchFinished, now);
    }

    fn apply_corrections<D: Display>(&mut self, board: &LatencyBoard, display: &mut D) {
        if self.corrections.is_empty() {
            return;
        }

        let mut accumulated = self.accumulated_ms;
        self.corrections.retain(|correction| {
            let Some(authoritative) = board.take(correction.id, correction.nonce) else {
                return true;
            };
            accumulated = (accumulated + u64::from(authoritative))
                .saturating_sub(u64::from(correction.provisional_ms));
            tracing::info!(
                peripheral = %correction.id,
                provisional_ms = correction.provisional_ms,
                authoritative_ms = authoritative,
                "provisional latency corrected"
            );
            false
        });

        if accumulated == self.accumulated_ms {
            return;
        }
        self.accumulated_ms = accumulated;
        if let Some(summary) = self.summary.as_mut() {
            summary.accumulated_ms = accumulated;
        }
        if self.state != GameState::RaceWait {
            display.show_digits(DigitReadout::elapsed(accumulated));
        }
    }
}

const fn unavailable_message(err: ArbitrationError) -> &'static str {
    match err {
        ArbitrationError::NoEligiblePeripherals => MSG_NO_BUZZERS,
        ArbitrationError::NoOnlinePeripherals { .. } => MSG_NO_BUZZERS_ONLINE,
    }
}

fn countdown_message(step: u8, steps: u8) -> &'static str {
    if step == 0 {
        "Ready?"
    } else if step + 1 == steps {
        "Set..."
    } else {
        "On your marks..."
    }
}
