use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rand::Rng;

/// Randomised pause a worker takes after each iteration, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThinkTime {
    min: Duration,
    max: Duration,
}

impl ThinkTime {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn between(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn fixed(duration: Duration) -> Self {
        Self::between(duration, duration)
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        if self.min == self.max {
            return self.min;
        }

        let micros = rng.gen_range(self.min.as_micros() as u64..=self.max.as_micros() as u64);
        Duration::from_micros(micros)
    }
}

/// A shared cap on the total number of iterations across all workers.
#[derive(Debug, Default)]
pub(crate) struct IterationBudget {
    limit: Option<u64>,
    claimed: AtomicU64,
}

impl IterationBudget {
    pub(crate) fn new(limit: Option<u64>) -> Self {
        Self {
            limit,
            claimed: AtomicU64::new(0),
        }
    }

    /// Claim the right to start one more iteration.
    pub(crate) fn try_claim(&self) -> bool {
        match self.limit {
            None => true,
            Some(limit) => self.claimed.fetch_add(1, Ordering::Relaxed) < limit,
        }
    }
}
