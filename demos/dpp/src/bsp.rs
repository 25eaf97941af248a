//! Board support for the hosted demo: console logging, a pseudo-random
//! think/eat duration source, and a millisecond tick driven from the
//! idle hook.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pulsar_kernel::Bsp;

/// Tick period of rate 0.
pub const TICK_MILLIS: u64 = 100;

// ── Logging ─────────────────────────────────────────────────────

struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            println!("[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

pub fn init_logging() {
    log::set_logger(&LOGGER).expect("logger already installed");
    log::set_max_level(log::LevelFilter::Info);
}

// ── Pseudo-random numbers ───────────────────────────────────────
//
// A tiny linear-congruential generator is all the "randomness" the demo
// needs, and it keeps runs reproducible for a given seed.

static RND: AtomicU32 = AtomicU32::new(1);

pub fn seed(s: u32) {
    RND.store(s, Ordering::Relaxed);
}

pub fn random() -> u32 {
    // "Super-Duper" multiplier; period is ample for a demo.
    let next = RND
        .load(Ordering::Relaxed)
        .wrapping_mul(3 * 7 * 11 * 13 * 23);
    RND.store(next, Ordering::Relaxed);
    next >> 8
}

/// A think or eat duration: 2..=9 ticks.
pub fn random_ticks() -> u32 {
    random() % 8 + 2
}

/// Philosopher status display — the demo's only user interface.
pub fn philo_stat(n: u8, stat: &str) {
    log::info!("philo {} is {}", n, stat);
}

// ── The board ───────────────────────────────────────────────────

pub struct DppBsp;

impl Bsp for DppBsp {
    fn on_startup(&self) {
        log::info!("dpp: table set, {}ms per tick", TICK_MILLIS);
    }

    fn on_idle(&self) {
        // One hosted "timer interrupt" per idle pass.
        std::thread::sleep(Duration::from_millis(TICK_MILLIS));
        self.on_clock_tick();
    }
}
