//! Bounded exponential backoff for the reader/writer waits
//!
//! A wait starts by spinning on the CPU with doubling spin counts, then yields
//! its time slice, and finally sleeps for doubling intervals capped at
//! `max_sleep_us`. The admission mutex is the only place a writer blocks in the
//! kernel; everything else goes through here.

use std::hint;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Backoff tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Steps spent busy-spinning (step n spins 2^n times)
    #[serde(rename = "spin-limit")]
    pub spin_limit: u32,

    /// Step at which yielding stops and sleeping starts
    #[serde(rename = "yield-limit")]
    pub yield_limit: u32,

    /// Upper bound for a single sleep in microseconds
    #[serde(rename = "max-sleep-us")]
    pub max_sleep_us: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            spin_limit: 6,
            yield_limit: 10,
            max_sleep_us: 1_000,
        }
    }
}

/// What a single [`Backoff::snooze`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    Spin(u32),
    Yield,
    Sleep(Duration),
}

/// Per-wait backoff state
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    step: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, step: 0 }
    }

    /// Number of snoozes so far
    pub fn step(&self) -> u32 {
        self.step
    }

    /// Wait once, escalating on every call
    pub fn snooze(&mut self) -> BackoffStep {
        let action = self.next_step();
        match action {
            BackoffStep::Spin(count) => {
                for _ in 0..count {
                    hint::spin_loop();
                }
            }
            BackoffStep::Yield => thread::yield_now(),
            BackoffStep::Sleep(duration) => {
                if self.step == self.config.yield_limit.max(self.config.spin_limit) {
                    debug!(step = self.step, "Backoff::snooze: wait escalated to sleeping");
                }
                thread::sleep(duration);
            }
        }
        self.step = self.step.saturating_add(1);
        action
    }

    /// Back off until `done` returns true
    pub fn wait_until(config: BackoffConfig, mut done: impl FnMut() -> bool) -> u32 {
        let mut backoff = Self::new(config);
        while !done() {
            backoff.snooze();
        }
        backoff.step()
    }

    fn next_step(&self) -> BackoffStep {
        let BackoffConfig {
            spin_limit,
            yield_limit,
            max_sleep_us,
        } = self.config;

        if self.step < spin_limit {
            BackoffStep::Spin(1u32 << self.step.min(31))
        } else if self.step < yield_limit {
            BackoffStep::Yield
        } else {
            let exponent = (self.step - yield_limit.max(spin_limit)).min(63);
            let micros = 1u64.checked_shl(exponent).unwrap_or(u64::MAX).min(max_sleep_us.max(1));
            BackoffStep::Sleep(Duration::from_micros(micros))
        }
    }
}
