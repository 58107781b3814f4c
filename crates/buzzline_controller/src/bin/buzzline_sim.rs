//! # Buzzline Simulator
//!
//! Plays one unattended match against a simulated buzzer fleet.
//!
//! ```bash
//! # Reference game, default config
//! buzzline_sim
//!
//! # Custom config, verbose
//! RUST_LOG=debug buzzline_sim buzzline.toml
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use buzzline_controller::{
    BusConditions, ChannelBus, Clock, Controller, GameState, LatencyBoard, MatchConfig,
    MonotonicClock, PeripheralFleet, RandomArming, TickLoop, TracingDisplay,
};
use tracing_subscriber::EnvFilter;

const BUS_QUEUE_CAPACITY: usize = 64;
const FLEET_SEED: u64 = 0xB022;

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match std::env::args().nth(1) {
        Some(path) => match MatchConfig::load(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!(error = %err, "cannot start");
                std::process::exit(1);
            }
        },
        None => MatchConfig::default(),
    };

    let board = Arc::new(LatencyBoard::new(config.peripheral_ids()));
    let (bus, endpoint) = ChannelBus::pair(BUS_QUEUE_CAPACITY, Arc::clone(&board));
    let policy = Box::new(RandomArming::from_config(&config));
    let (mut controller, operator) =
        Controller::new(&config, bus, TracingDisplay::default(), board, policy);

    let clock = MonotonicClock::new();
    let running = Arc::new(AtomicBool::new(true));

    let mut fleet = PeripheralFleet::new(config.peripheral_ids(), BusConditions::NOISY, FLEET_SEED);
    let fleet_stats = fleet.stats_handle();
    let fleet_running = Arc::clone(&running);
    let fleet_thread = std::thread::spawn(move || {
        while fleet_running.load(Ordering::Relaxed) {
            fleet.step(&endpoint, clock.now());
            std::thread::sleep(Duration::from_millis(5));
        }
    });

    // Let presence settle before starting.
    std::thread::sleep(Duration::from_millis(300));
    operator.start();

    let mut tick_loop = TickLoop::new(config.tick_rate);
    while controller.state() != GameState::MatchFinished {
        for _ in 0..tick_loop.due_ticks(clock.now()) {
            let started = Instant::now();
            controller.tick(clock.now());
            tick_loop.record(started.elapsed());
        }
        std::thread::sleep(tick_loop.idle_time(clock.now()));
    }

    running.store(false, Ordering::Relaxed);
    if fleet_thread.join().is_err() {
        tracing::warn!("fleet thread panicked");
    }

    if let Some(summary) = controller.sequencer().summary() {
        tracing::info!(
            rounds = summary.rounds_completed,
            score_ms = summary.accumulated_ms,
            penalties = summary.penalties,
            early = summary.finished_early,
            "final score"
        );
    }
    let fleet = *fleet_stats.lock();
    tracing::info!(
        ?fleet,
        transport = ?controller.transport_stats(),
        ticks = ?tick_loop.stats(),
        "simulation stats"
    );
}
