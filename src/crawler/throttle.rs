use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

/// Smallest allowed lower bound for the dispatch interval, in seconds
pub const MIN_RATE_FLOOR: f64 = 0.25;

/// Relative jitter applied on top of the drawn interval
pub const JITTER: f64 = 1.0 / 3.0;

/// Base dispatch interval for a given queue depth.
pub fn adaptive_base(depth: usize) -> f64 {
    match depth {
        0..=10 => 0.70,
        11..=20 => 0.85,
        21..=30 => 1.70,
        _ => 3.40,
    }
}

/// Interval bounds (seconds) in effect for the given queue depth.
pub fn interval_bounds(min_rate: f64, max_rate: f64, adaptive: bool, depth: usize) -> (f64, f64) {
    let low = if adaptive {
        min_rate.max(adaptive_base(depth))
    } else {
        min_rate
    };
    (low, max_rate.max(low))
}

/// Draw one inter-dispatch interval: uniform in `[low, high]`, then scaled by a
/// uniform factor in `[1 - JITTER, 1 + JITTER]`.
pub fn draw_interval<R: Rng + ?Sized>(low: f64, high: f64, rng: &mut R) -> Duration {
    let base = if high > low { rng.gen_range(low..=high) } else { low };
    let factor = rng.gen_range((1.0 - JITTER)..=(1.0 + JITTER));
    Duration::from_secs_f64((base * factor).max(0.0))
}

/// Single timer enforcing the minimum spacing between dispatches.
#[derive(Debug, Default)]
pub struct Throttle {
    next_allowed: Option<Instant>,
}

impl Throttle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time left before the next dispatch may happen, if any
    pub fn remaining(&self) -> Option<Duration> {
        let deadline = self.next_allowed?;
        let now = Instant::now();
        (deadline > now).then(|| deadline - now)
    }

    /// Start the timer: the next dispatch is allowed after `interval`
    pub fn arm(&mut self, interval: Duration) {
        self.next_allowed = Some(Instant::now() + interval);
    }
}
