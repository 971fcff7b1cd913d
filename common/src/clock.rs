use std::{fmt, time::Duration};

use tokio::time::{Instant, Sleep};

use crate::error::ConfigError;

/// Source of "now" for the duty-cycle lanes.
///
/// All durations handed to a clock are in the clock's own time base. A dilated
/// clock runs faster than real time, so `sleep` maps the requested duration back
/// onto the runtime's timer.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Instant;

    fn since(&self, earlier: Instant) -> Duration {
        self.now().saturating_duration_since(earlier)
    }

    /// How many clock seconds pass per real second.
    fn factor(&self) -> f64 {
        1.0
    }

    /// Real time that elapses while `duration` passes on this clock.
    fn real_duration(&self, duration: Duration) -> Duration {
        duration
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        tokio::time::sleep(self.real_duration(duration))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Slowest dilation accepted by [`DilatedClock::new`].
pub const MIN_MULTIPLIER: f64 = 1e-3;
/// Fastest dilation accepted by [`DilatedClock::new`].
pub const MAX_MULTIPLIER: f64 = 1e6;

/// A clock whose elapsed time is `multiplier` times the real elapsed time.
#[derive(Debug, Clone)]
pub struct DilatedClock {
    multiplier: f64,
    start: Instant,
}

impl DilatedClock {
    pub fn new(multiplier: f64) -> Result<Self, ConfigError> {
        if !(MIN_MULTIPLIER..=MAX_MULTIPLIER).contains(&multiplier) {
            return Err(ConfigError::InvalidMultiplier(multiplier));
        }

        Ok(Self {
            multiplier,
            start: Instant::now(),
        })
    }

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }
}

impl Clock for DilatedClock {
    fn now(&self) -> Instant {
        let real = self.start.elapsed();
        self.start + real.mul_f64(self.multiplier)
    }

    fn factor(&self) -> f64 {
        self.multiplier
    }

    fn real_duration(&self, duration: Duration) -> Duration {
        Duration::try_from_secs_f64(duration.as_secs_f64() / self.multiplier)
            .unwrap_or(Duration::MAX)
    }
}
