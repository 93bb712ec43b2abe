//! Idle strategy of the appender thread.
//!
//! Spins first, then parks for short and finally long intervals. Parking
//! always has a timeout so the stop flag is observed promptly; producers
//! `unpark` the appender after every offer.

use std::hint;
use std::thread;
use std::time::Duration;

/// Default number of spinning idle iterations on multi-core hosts.
pub const DEFAULT_SPIN_THRESHOLD: u64 = 1000;
/// Idle iterations after which the strategy switches to long parks.
pub const DEFAULT_SHORT_PARK_THRESHOLD: u64 = 100_000;
/// Default short park interval.
pub const DEFAULT_SHORT_PARK: Duration = Duration::from_micros(10);
/// Default long park interval.
pub const DEFAULT_LONG_PARK: Duration = Duration::from_millis(10);

/// Idle strategy configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleConfig {
    /// Idle iterations spent spinning
    pub spin_threshold: u64,
    /// Idle iterations after which parks become long
    pub short_park_threshold: u64,
    /// Short park interval
    pub short_park: Duration,
    /// Long park interval
    pub long_park: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        let spin_threshold = match thread::available_parallelism() {
            Ok(n) if n.get() >= 2 => DEFAULT_SPIN_THRESHOLD,
            _ => 1,
        };
        Self {
            spin_threshold,
            short_park_threshold: DEFAULT_SHORT_PARK_THRESHOLD,
            short_park: DEFAULT_SHORT_PARK,
            long_park: DEFAULT_LONG_PARK,
        }
    }
}

impl IdleConfig {
    /// Set the spin threshold
    pub fn with_spin_threshold(mut self, spin_threshold: u64) -> Self {
        self.spin_threshold = spin_threshold;
        self
    }

    /// Set the short park threshold
    pub fn with_short_park_threshold(mut self, threshold: u64) -> Self {
        self.short_park_threshold = threshold;
        self
    }

    /// Set the short park interval
    pub fn with_short_park(mut self, park: Duration) -> Self {
        self.short_park = park;
        self
    }

    /// Set the long park interval
    pub fn with_long_park(mut self, park: Duration) -> Self {
        self.long_park = park;
        self
    }
}

/// What one idle iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleAction {
    /// Busy-wait hint
    Spin,
    /// Timed park
    Park(Duration),
}

/// Spin, then short parks, then long parks.
#[derive(Debug, Clone)]
pub struct SpinParkIdleStrategy {
    config: IdleConfig,
}

impl SpinParkIdleStrategy {
    /// Create a strategy from `config`
    pub fn new(config: IdleConfig) -> Self {
        Self { config }
    }

    /// Action for the `counter`-th consecutive idle iteration
    pub fn action(&self, counter: u64) -> IdleAction {
        if counter < self.config.spin_threshold {
            IdleAction::Spin
        } else if counter < self.config.short_park_threshold {
            IdleAction::Park(self.config.short_park)
        } else {
            IdleAction::Park(self.config.long_park)
        }
    }

    /// Wait once and return the next counter value.
    ///
    /// Callers reset the counter to zero whenever they find work.
    pub fn idle(&self, counter: u64) -> u64 {
        match self.action(counter) {
            IdleAction::Spin => hint::spin_loop(),
            IdleAction::Park(duration) => thread::park_timeout(duration),
        }
        counter.saturating_add(1).min(self.config.short_park_threshold)
    }
}

impl Default for SpinParkIdleStrategy {
    fn default() -> Self {
        Self::new(IdleConfig::default())
    }
}
