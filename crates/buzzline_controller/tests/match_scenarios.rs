//! End-to-end match scenarios against a scripted controller.

use std::sync::Arc;

use buzzline_controller::{
    BusEndpoint, ChannelBus, Controller, DigitReadout, GameState, LatencyBoard, MatchConfig,
    OperatorHandle, PressLatency, RecordingDisplay, ScriptedArming, Timestamp,
};
use buzzline_protocol::{Frame, PeripheralId};

const TICK_MS: u64 = 10;
const PRESENCE_EVERY_MS: u64 = 100;
const ARMING_DELAY_MS: u32 = 2000;

struct Harness {
    controller: Controller<ChannelBus, RecordingDisplay>,
    operator: OperatorHandle,
    endpoint: BusEndpoint,
    display: RecordingDisplay,
    sent: Vec<Frame>,
    alive: Vec<u8>,
    now: u64,
}

impl Harness {
    fn new(picks: &[u8]) -> Self {
        Self::with_config(MatchConfig::default(), picks)
    }

    fn with_config(config: MatchConfig, picks: &[u8]) -> Self {
        let board = Arc::new(LatencyBoard::new(config.peripheral_ids()));
        let (bus, endpoint) = ChannelBus::pair(256, Arc::clone(&board));
        let display = RecordingDisplay::new();
        let policy = ScriptedArming::new(picks.iter().copied().map(PeripheralId), ARMING_DELAY_MS);
        let (controller, operator) =
            Controller::new(&config, bus, display.clone(), board, Box::new(policy));
        let mut harness = Self {
            controller,
            operator,
            endpoint,
            display,
            sent: Vec::new(),
            alive: vec![1, 2, 3, 4],
            now: 0,
        };
        harness.chatter();
        harness.tick();
        harness
    }

    fn chatter(&self) {
        for &id in &self.alive {
            self.endpoint.deliver(&Frame::presence(PeripheralId(id)));
        }
    }

    fn tick(&mut self) {
        self.controller.tick(Timestamp(self.now));
        self.sent.extend(self.endpoint.drain_outbound_frames());
    }

    fn advance(&mut self, ms: u64) {
        for _ in 0..ms / TICK_MS {
            self.now += TICK_MS;
            if self.now % PRESENCE_EVERY_MS == 0 {
                self.chatter();
            }
            self.tick();
        }
    }

    fn advance_until(&mut self, state: GameState) {
        for _ in 0..1000 {
            if self.controller.state() == state {
                return;
            }
            self.advance(TICK_MS);
        }
        panic!("never reached {state:?}, stuck in {:?}", self.controller.state());
    }

    fn press(&mut self, id: u8, nonce: u8, latency_ms: Option<u32>) {
        self.endpoint.deliver(&Frame::press(PeripheralId(id), nonce, latency_ms));
        self.advance(TICK_MS);
    }

    fn start_race(&mut self) {
        self.operator.start();
        self.advance_until(GameState::RaceWait);
    }

    fn accumulated(&self) -> u64 {
        self.controller.sequencer().accumulated_ms()
    }

    fn armed(&self) -> Option<PeripheralId> {
        self.controller.registry().armed()
    }
}

#[test]
fn test_penalty_then_armed_press_with_timestamp() {
    let mut h = Harness::new(&[3]);
    h.start_race();
    assert_eq!(h.armed(), Some(PeripheralId(3)));
    assert!(h.sent.contains(&Frame::arm(PeripheralId(3))));
    assert_eq!(h.display.last_message().as_deref(), Some("Buzzer 3 !!!"));

    h.press(2, 1, Some(50));
    assert_eq!(h.accumulated(), 1000);
    assert_eq!(h.controller.state(), GameState::RaceWait);

    h.press(3, 1, Some(420));
    assert_eq!(h.accumulated(), 1420);
    let result = *h.controller.sequencer().last_result().unwrap();
    assert_eq!(result.winner, PeripheralId(3));
    assert_eq!(result.latency, PressLatency::peripheral(420));
    assert_eq!(result.penalties, 1);
    assert_eq!(h.sent.last(), Some(&Frame::idle()));
    assert_eq!(h.armed(), None);

    h.advance_until(GameState::ArmingWait);
    assert_eq!(h.controller.sequencer().round_number(), 2);
    assert_eq!(h.display.last_message().as_deref(), Some("Round 2"));
}

#[test]
fn test_duplicate_nonce_counted_once() {
    let mut h = Harness::new(&[3]);
    h.start_race();

    h.endpoint.deliver(&Frame::press(PeripheralId(2), 7, None));
    h.endpoint.deliver(&Frame::press(PeripheralId(2), 7, None));
    h.advance(TICK_MS);
    h.press(2, 7, None);
    assert_eq!(h.accumulated(), 1000);

    h.press(3, 9, Some(300));
    h.press(3, 9, Some(300));
    assert_eq!(h.accumulated(), 1300);
    assert_eq!(h.controller.sequencer().last_result().unwrap().penalties, 1);
}

#[test]
fn test_provisional_latency_corrected_by_late_timestamp() {
    let mut h = Harness::new(&[1, 2]);
    h.start_race();

    h.advance(290);
    h.press(1, 1, None);
    assert_eq!(h.accumulated(), 300);
    assert_eq!(
        h.controller.sequencer().last_result().unwrap().latency,
        PressLatency::provisional(300)
    );
    assert_eq!(h.controller.sequencer().pending_corrections(), 1);

    // The retransmission carries the peripheral's own measurement.
    h.press(1, 1, Some(280));
    assert_eq!(h.accumulated(), 280);
    assert_eq!(h.controller.sequencer().pending_corrections(), 0);

    // A further retransmission during the next arming delay is not a press.
    h.advance_until(GameState::ArmingWait);
    h.press(1, 1, Some(280));
    h.advance_until(GameState::RaceWait);
    h.advance(TICK_MS);
    assert_eq!(h.accumulated(), 280);
}

#[test]
fn test_empty_eligible_set_finishes_without_increment() {
    let mut h = Harness::new(&[2]);
    h.start_race();
    h.press(2, 1, Some(100));
    assert_eq!(h.controller.state(), GameState::RoundStart);

    for id in 1..=4 {
        h.controller.set_eligible(PeripheralId(id), false);
    }
    h.advance(TICK_MS);
    assert_eq!(h.controller.state(), GameState::MatchFinished);
    assert_eq!(h.controller.sequencer().round_number(), 1);
    assert_eq!(h.display.last_message().as_deref(), Some("No buzzers available!"));

    let summary = *h.controller.sequencer().summary().unwrap();
    assert!(summary.finished_early);
    assert_eq!(summary.rounds_completed, 1);
    assert_eq!(summary.accumulated_ms, 100);
}

#[test]
fn test_eligible_set_emptied_during_arming_delay() {
    let mut h = Harness::new(&[4]);
    h.operator.start();
    h.advance_until(GameState::ArmingWait);

    for id in 1..=4 {
        h.controller.set_eligible(PeripheralId(id), false);
    }
    h.advance(TICK_MS);
    assert_eq!(h.controller.state(), GameState::MatchFinished);
    assert_eq!(h.controller.sequencer().round_number(), 1);
    assert_eq!(h.armed(), None);
}

#[test]
fn test_press_as_first_frame_is_not_scored() {
    let mut h = Harness::new(&[3]);
    h.alive = vec![1, 2, 3];
    // Peripheral 4 was seen once at start-up; let it lapse.
    h.advance(1500);
    assert!(!h.controller.is_online(PeripheralId(4), Timestamp(h.now)));

    h.start_race();
    h.press(4, 1, None);
    assert_eq!(h.accumulated(), 0);

    // Now that 4 has been heard from, its next press is an illegal press.
    h.press(4, 2, None);
    assert_eq!(h.accumulated(), 1000);
}

#[test]
fn test_abort_discards_score() {
    let mut h = Harness::new(&[3]);
    h.start_race();
    h.press(1, 1, None);
    assert_eq!(h.accumulated(), 1000);

    h.sent.clear();
    assert!(h.operator.abort());
    h.advance(TICK_MS);
    assert_eq!(h.controller.state(), GameState::Idle);
    assert_eq!(h.accumulated(), 0);
    assert_eq!(h.controller.sequencer().round_number(), 0);
    assert_eq!(h.armed(), None);
    assert_eq!(h.sent.first(), Some(&Frame::idle()));
    assert!(h.display.messages().contains(&"Game aborted".to_string()));

    // Late presses after the abort are not game input.
    h.press(3, 2, Some(100));
    assert_eq!(h.accumulated(), 0);
}

#[test]
fn test_full_match_then_acknowledge() {
    let mut h = Harness::new(&[1, 2, 3, 4, 1]);
    h.operator.start();

    let mut expected = 0;
    for round in 1..=5u8 {
        h.advance_until(GameState::RaceWait);
        let armed = h.armed().unwrap();
        let latency = 100 * u32::from(round);
        h.press(armed.get(), round, Some(latency));
        expected += u64::from(latency);
        assert_eq!(h.accumulated(), expected);
    }

    h.advance_until(GameState::MatchFinished);
    let summary = *h.controller.sequencer().summary().unwrap();
    assert_eq!(summary.rounds_completed, 5);
    assert_eq!(summary.accumulated_ms, 1500);
    assert_eq!(summary.penalties, 0);
    assert!(!summary.finished_early);
    assert_eq!(h.controller.sequencer().round_number(), 5);
    assert_eq!(h.display.last_digits(), Some(DigitReadout::elapsed(1500)));

    assert!(h.operator.acknowledge());
    h.advance(TICK_MS);
    assert_eq!(h.controller.state(), GameState::Idle);
}

#[test]
fn test_presses_during_countdown_are_ignored() {
    let mut h = Harness::new(&[2]);
    h.operator.start();
    h.advance(TICK_MS);
    assert_eq!(h.controller.state(), GameState::ReadyCountdown);

    h.press(1, 1, None);
    h.press(2, 1, None);
    h.advance_until(GameState::RaceWait);
    h.advance(TICK_MS);
    assert_eq!(h.accumulated(), 0);
}

#[test]
fn test_press_during_arming_delay_is_penalized() {
    let mut h = Harness::new(&[2]);
    h.operator.start();
    h.advance_until(GameState::ArmingWait);

    // Even the peripheral about to be armed may not anticipate.
    h.press(2, 1, None);
    h.advance_until(GameState::RaceWait);
    h.advance(TICK_MS);
    assert_eq!(h.accumulated(), 1000);
    assert_eq!(h.controller.state(), GameState::RaceWait);
}

#[test]
fn test_operator_simulated_press_wins_round() {
    let mut h = Harness::new(&[2]);
    h.start_race();
    h.advance(240);
    assert!(h.operator.simulated_press());
    h.advance(TICK_MS);
    let result = *h.controller.sequencer().last_result().unwrap();
    assert_eq!(result.winner, PeripheralId(2));
    assert_eq!(result.latency, PressLatency::operator(250));
    assert_eq!(h.accumulated(), 250);
}

#[test]
fn test_arm_reannounced_while_race_open() {
    let mut h = Harness::new(&[3]);
    h.start_race();
    h.sent.clear();
    h.advance(2000);
    let arms = h.sent.iter().filter(|f| **f == Frame::arm(PeripheralId(3))).count();
    assert_eq!(arms, 2);
    assert!(!h.sent.contains(&Frame::idle()));
}

#[test]
fn test_late_correction_and_next_win_in_same_tick() {
    let mut h = Harness::new(&[1, 1]);
    h.start_race();
    h.advance(300);
    h.press(1, 1, None);
    let provisional = h.accumulated();
    assert_eq!(h.controller.sequencer().pending_corrections(), 1);

    h.advance_until(GameState::RaceWait);
    assert_eq!(h.controller.sequencer().round_number(), 2);
    assert_eq!(h.accumulated(), provisional);

    // Round 2's press and round 1's retransmission land together.
    h.endpoint.deliver(&Frame::press(PeripheralId(1), 2, Some(150)));
    h.press(1, 1, Some(280));

    assert_eq!(h.accumulated(), 280 + 150);
    assert_eq!(
        h.controller.sequencer().last_result().unwrap().latency,
        PressLatency::peripheral(150)
    );
    assert_eq!(h.controller.sequencer().pending_corrections(), 0);
}

#[test]
fn test_match_completes_with_saturated_transmit_queue() {
    let config = MatchConfig::default();
    let board = Arc::new(LatencyBoard::new(config.peripheral_ids()));
    // One slot each way, and the transmit side is never drained.
    let (bus, endpoint) = ChannelBus::pair(1, Arc::clone(&board));
    let policy = ScriptedArming::new([PeripheralId(1)], ARMING_DELAY_MS);
    let (mut controller, operator) =
        Controller::new(&config, bus, RecordingDisplay::new(), board, Box::new(policy));

    assert!(operator.start());
    let mut nonce = 0u8;
    let mut now = 0;
    while controller.state() != GameState::MatchFinished && now < 60_000 {
        let frame = if controller.state() == GameState::RaceWait && now % 100 == 50 {
            nonce += 1;
            Frame::press(PeripheralId(1), nonce, Some(200))
        } else {
            Frame::presence(PeripheralId(1))
        };
        assert!(endpoint.deliver(&frame));
        controller.tick(Timestamp(now));
        now += TICK_MS;
    }

    assert_eq!(controller.state(), GameState::MatchFinished);
    let summary = *controller.sequencer().summary().unwrap();
    assert_eq!(summary.rounds_completed, 5);
    assert_eq!(summary.accumulated_ms, 1000);
    assert!(!summary.finished_early);

    let stats = controller.transport_stats();
    assert_eq!(stats.frames_sent, 1);
    assert!(stats.send_errors >= 5);
}
