use std::time::Duration;

use rand::Rng;

/// Inclusive range of seconds to pause for.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Delay {
    pub min_secs: f64,
    pub max_secs: f64,
}

impl Delay {
    pub const fn fixed(secs: f64) -> Self {
        Self {
            min_secs: secs,
            max_secs: secs,
        }
    }

    pub const fn between(min_secs: f64, max_secs: f64) -> Self {
        Self { min_secs, max_secs }
    }
}

pub const HOME_SETTLE: Delay = Delay::fixed(2.0);
pub const WARMUP_STEP: Delay = Delay::fixed(1.0);
pub const FIELD_CLEARED: Delay = Delay::fixed(0.5);
pub const KEYSTROKE: Delay = Delay::between(0.04, 0.12);
pub const FIELD_TYPED: Delay = Delay::fixed(1.0);
pub const RESULTS_SETTLE: Delay = Delay::fixed(5.0);
pub const PAGE_SCROLL: Delay = Delay::fixed(1.0);
pub const BEFORE_PAGINATION: Delay = Delay::between(2.0, 4.0);
pub const SCROLL_SETTLE: Delay = Delay::fixed(0.5);
pub const HOVER_DWELL: Delay = Delay::between(0.3, 0.8);
pub const PAGE_LOAD: Delay = Delay::between(6.0, 10.0);
pub const BETWEEN_PAGES: Delay = Delay::between(5.0, 8.0);
pub const DETAIL_SETTLE: Delay = Delay::fixed(2.0);
pub const ANCHOR_DWELL: Delay = Delay::between(0.5, 1.0);
pub const BETWEEN_DETAILS: Delay = Delay::between(6.0, 10.0);

const JITTER_PX: i64 = 50;

/// Largest accepted `--pace` multiplier.
pub const MAX_SCALE: f64 = 100.0;

/// Human-looking pauses between browser actions.
///
/// `scale` multiplies every delay; zero turns pacing off.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Pacer {
    scale: f64,
}

impl Default for Pacer {
    fn default() -> Self {
        Self { scale: 1.0 }
    }
}

impl Pacer {
    pub fn new(scale: f64) -> Self {
        Self {
            scale: if scale.is_finite() {
                scale.clamp(0.0, MAX_SCALE)
            } else {
                1.0
            },
        }
    }

    pub fn instant() -> Self {
        Self { scale: 0.0 }
    }

    pub fn is_instant(&self) -> bool {
        self.scale == 0.0
    }

    pub fn sample(&self, delay: Delay) -> Duration {
        if self.is_instant() {
            return Duration::ZERO;
        }
        let (lo, hi) = if delay.min_secs <= delay.max_secs {
            (delay.min_secs, delay.max_secs)
        } else {
            (delay.max_secs, delay.min_secs)
        };
        let secs = if hi > lo {
            rand::rng().random_range(lo..=hi)
        } else {
            lo
        };
        Duration::try_from_secs_f64((secs * self.scale).max(0.0)).unwrap_or(Duration::MAX)
    }

    pub async fn pause(&self, delay: Delay) -> Duration {
        let wait = self.sample(delay);
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        wait
    }

    /// Small random pointer offset and how long the move should take.
    pub fn jitter(&self) -> (i64, i64, Duration) {
        let mut rng = rand::rng();
        let dx = rng.random_range(-JITTER_PX..=JITTER_PX);
        let dy = rng.random_range(-JITTER_PX..=JITTER_PX);
        let duration = if self.is_instant() {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(rng.random_range(0.1..=0.3))
        };
        (dx, dy, duration)
    }
}
