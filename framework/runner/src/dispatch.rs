use anyhow::{bail, Context};

use load_tunnel_instruments::RequestOutcome;

use crate::context::{UserValuesConstraint, WorkerContext};
use crate::definition::ScenarioHook;

const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Picks an item from a cumulative weight table using a uniform draw in `[0, 1)`.
///
/// Items are checked in the order they were added and the first one whose cumulative weight
/// exceeds the draw is selected. An optional remainder item takes whatever probability the
/// weighted items leave over.
#[derive(Debug, Clone)]
pub struct WeightedDispatcher<T> {
    entries: Vec<(f64, T)>,
    remainder: Option<T>,
}

impl<T> Default for WeightedDispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WeightedDispatcher<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            remainder: None,
        }
    }

    pub fn weighted(mut self, weight: f64, item: T) -> Self {
        self.push_weighted(weight, item);
        self
    }

    pub fn remainder(mut self, item: T) -> Self {
        self.set_remainder(item);
        self
    }

    pub(crate) fn push_weighted(&mut self, weight: f64, item: T) {
        let cumulative = self.total_weight() + weight;
        self.entries.push((cumulative, item));
    }

    pub(crate) fn set_remainder(&mut self, item: T) -> Option<T> {
        self.remainder.replace(item)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.remainder.is_none()
    }

    /// Sum of the explicit weights, excluding the remainder.
    pub fn total_weight(&self) -> f64 {
        self.entries.last().map(|(c, _)| *c).unwrap_or(0.0)
    }

    /// Check that the table describes a probability distribution.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.is_empty() {
            bail!("No scenarios to dispatch");
        }

        let mut previous = 0.0;
        for (index, (cumulative, _)) in self.entries.iter().enumerate() {
            let weight = cumulative - previous;
            if !weight.is_finite() || weight <= 0.0 {
                bail!("Weight {} must be a positive number, got {weight}", index + 1);
            }
            previous = *cumulative;
        }

        let total = self.total_weight();
        if total > 1.0 + WEIGHT_TOLERANCE {
            bail!("Weights add up to {total}, which is more than 1");
        }
        if self.remainder.is_none()
            && !self.entries.is_empty()
            && (1.0 - total).abs() > WEIGHT_TOLERANCE
        {
            bail!("Weights add up to {total} but there is no remainder to take the rest");
        }

        Ok(())
    }

    pub fn select(&self, draw: f64) -> Option<&T> {
        self.entries
            .iter()
            .find(|(cumulative, _)| draw < *cumulative)
            .map(|(_, item)| item)
            .or(self.remainder.as_ref())
            .or_else(|| self.entries.last().map(|(_, item)| item))
    }
}

pub(crate) struct NamedScenario<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) hook: ScenarioHook<RV, V>,
}

/// Selects the scenario each iteration runs and invokes it with the worker's context.
pub struct ScenarioDispatcher<RV: UserValuesConstraint, V: UserValuesConstraint> {
    scenarios: WeightedDispatcher<NamedScenario<RV, V>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDispatcher<RV, V> {
    pub(crate) fn new(
        scenarios: WeightedDispatcher<NamedScenario<RV, V>>,
    ) -> anyhow::Result<Self> {
        scenarios.validate().context("Invalid scenario weights")?;

        Ok(Self { scenarios })
    }

    pub fn dispatch(
        &self,
        draw: f64,
        ctx: &mut WorkerContext<RV, V>,
    ) -> anyhow::Result<RequestOutcome> {
        let scenario = self
            .scenarios
            .select(draw)
            .context("No scenarios to dispatch")?;

        log::trace!("{} running {}", ctx.worker_id(), scenario.name);
        (scenario.hook)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn mixed() -> WeightedDispatcher<&'static str> {
        WeightedDispatcher::new()
            .weighted(0.7, "create")
            .weighted(0.2, "query")
            .remainder("health")
    }

    #[test]
    fn test_should_select_by_cumulative_weight() {
        let dispatcher = mixed();

        assert_eq!(Some(&"create"), dispatcher.select(0.0));
        assert_eq!(Some(&"create"), dispatcher.select(0.69));
        assert_eq!(Some(&"query"), dispatcher.select(0.7));
        assert_eq!(Some(&"query"), dispatcher.select(0.89));
        assert_eq!(Some(&"health"), dispatcher.select(0.9));
        assert_eq!(Some(&"health"), dispatcher.select(0.999));
    }

    #[test]
    fn test_should_converge_to_declared_weights() {
        let dispatcher = mixed();
        let mut rng = StdRng::seed_from_u64(42);
        let draws = 100_000;

        let mut counts = [0usize; 3];
        for _ in 0..draws {
            match dispatcher.select(rng.gen::<f64>()) {
                Some(&"create") => counts[0] += 1,
                Some(&"query") => counts[1] += 1,
                Some(&"health") => counts[2] += 1,
                other => panic!("Unexpected selection {other:?}"),
            }
        }

        for (count, expected) in counts.iter().zip([0.7, 0.2, 0.1]) {
            let frequency = *count as f64 / draws as f64;
            assert!(
                (frequency - expected).abs() < 0.01,
                "frequency {frequency} too far from {expected}"
            );
        }
    }

    #[test]
    fn test_should_accept_single_remainder() {
        let dispatcher = WeightedDispatcher::new().remainder("health");

        assert!(dispatcher.validate().is_ok());
        assert_eq!(Some(&"health"), dispatcher.select(0.5));
    }

    #[test]
    fn test_should_accept_weights_summing_to_one() {
        let dispatcher = WeightedDispatcher::new()
            .weighted(0.7, "create")
            .weighted(0.2, "query")
            .weighted(0.1, "health");

        assert!(dispatcher.validate().is_ok());
        assert_eq!(Some(&"health"), dispatcher.select(0.9999999999999999));
    }

    #[test]
    fn test_should_reject_invalid_weights() {
        assert!(WeightedDispatcher::<&str>::new().validate().is_err());
        assert!(WeightedDispatcher::new()
            .weighted(0.8, "create")
            .weighted(0.3, "query")
            .remainder("health")
            .validate()
            .is_err());
        assert!(WeightedDispatcher::new()
            .weighted(0.7, "create")
            .validate()
            .is_err());
        assert!(WeightedDispatcher::new()
            .weighted(-0.1, "create")
            .remainder("health")
            .validate()
            .is_err());
    }
}
