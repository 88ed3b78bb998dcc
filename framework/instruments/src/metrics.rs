use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::outcome::RequestOutcome;

/// Names of the metrics recorded by the runner for every outcome and iteration.
pub mod names {
    pub const HTTP_REQS: &str = "http_reqs";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const ERRORS: &str = "errors";
    pub const CHECKS: &str = "checks";
    pub const ITERATIONS: &str = "iterations";
    pub const ITERATION_DURATION: &str = "iteration_duration";
    pub const ITERATION_ERRORS: &str = "iteration_errors";
}

/// How many failed outcomes are kept for the report.
const FAILURE_SAMPLE_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Rate,
    Trend,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricKind::Counter => write!(f, "counter"),
            MetricKind::Rate => write!(f, "rate"),
            MetricKind::Trend => write!(f, "trend"),
        }
    }
}

/// A single observation. The variant decides the kind of series it is recorded into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    /// Increment a counter.
    Count(u64),
    /// Add a boolean to a rate, `true` counts towards the rate.
    Rate(bool),
    /// Add a sample to a trend. Durations are recorded in milliseconds.
    Sample(f64),
}

impl Observation {
    pub fn kind(&self) -> MetricKind {
        match self {
            Observation::Count(_) => MetricKind::Counter,
            Observation::Rate(_) => MetricKind::Rate,
            Observation::Sample(_) => MetricKind::Trend,
        }
    }

    pub fn duration(duration: Duration) -> Self {
        Observation::Sample(duration.as_micros() as f64 / 1000.0)
    }
}

#[derive(Debug)]
enum MetricSeries {
    Counter(u64),
    Rate { passes: u64, total: u64 },
    Trend(Vec<f64>),
}

impl MetricSeries {
    fn new(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricSeries::Counter(0),
            MetricKind::Rate => MetricSeries::Rate {
                passes: 0,
                total: 0,
            },
            MetricKind::Trend => MetricSeries::Trend(Vec::new()),
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            MetricSeries::Counter(_) => MetricKind::Counter,
            MetricSeries::Rate { .. } => MetricKind::Rate,
            MetricSeries::Trend(_) => MetricKind::Trend,
        }
    }

    /// Returns false if the observation does not belong in this series.
    fn apply(&mut self, observation: Observation) -> bool {
        match (self, observation) {
            (MetricSeries::Counter(count), Observation::Count(value)) => {
                *count += value;
                true
            }
            (MetricSeries::Rate { passes, total }, Observation::Rate(value)) => {
                *total += 1;
                if value {
                    *passes += 1;
                }
                true
            }
            (MetricSeries::Trend(samples), Observation::Sample(value)) => {
                samples.push(value);
                true
            }
            _ => false,
        }
    }

    fn summarize(self, elapsed: Duration) -> MetricSummary {
        match self {
            MetricSeries::Counter(count) => {
                let secs = elapsed.as_secs_f64();
                MetricSummary::Counter(CounterSummary {
                    count,
                    rate: if secs > 0.0 { count as f64 / secs } else { 0.0 },
                })
            }
            MetricSeries::Rate { passes, total } => MetricSummary::Rate(RateSummary {
                rate: if total > 0 {
                    passes as f64 / total as f64
                } else {
                    0.0
                },
                passes,
                fails: total - passes,
            }),
            MetricSeries::Trend(samples) => {
                MetricSummary::Trend(TrendSummary::from_samples(samples))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSummary {
    pub count: u64,
    /// Per second over the elapsed run time.
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateSummary {
    /// `passes / (passes + fails)`, 0 when nothing was observed.
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

impl RateSummary {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }
}

/// Statistics over every sample of a trend.
///
/// Percentiles use linear interpolation between the closest ranks of the sorted samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSummary {
    pub count: usize,
    pub avg: f64,
    pub min: f64,
    pub med: f64,
    pub max: f64,
    #[serde(rename = "p(90)")]
    pub p90: f64,
    #[serde(rename = "p(95)")]
    pub p95: f64,
    #[serde(rename = "p(99)")]
    pub p99: f64,
    #[serde(skip)]
    sorted: Vec<f64>,
}

impl TrendSummary {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        samples.sort_by(f64::total_cmp);
        let count = samples.len();
        let at = |p: f64| percentile(&samples, p).unwrap_or(0.0);

        Self {
            count,
            avg: if count > 0 {
                samples.iter().sum::<f64>() / count as f64
            } else {
                0.0
            },
            min: samples.first().copied().unwrap_or(0.0),
            med: at(50.0),
            max: samples.last().copied().unwrap_or(0.0),
            p90: at(90.0),
            p95: at(95.0),
            p99: at(99.0),
            sorted: samples,
        }
    }

    /// Any percentile between 0 and 100. Only available on a summary built from samples.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        percentile(&self.sorted, p)
    }
}

/// Percentile of sorted values with linear interpolation between closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricSummary {
    Counter(CounterSummary),
    Rate(RateSummary),
    Trend(TrendSummary),
}

impl MetricSummary {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricSummary::Counter(_) => MetricKind::Counter,
            MetricSummary::Rate(_) => MetricKind::Rate,
            MetricSummary::Trend(_) => MetricKind::Trend,
        }
    }
}

/// A failed outcome kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSample {
    pub scenario: String,
    pub status_code: Option<u16>,
    pub error: Option<String>,
    pub body_excerpt: Option<String>,
    pub failed_checks: Vec<String>,
}

impl FailureSample {
    fn from_outcome(outcome: &RequestOutcome) -> Self {
        Self {
            scenario: outcome.scenario_name().to_string(),
            status_code: outcome.status_code(),
            error: outcome.error().map(ToString::to_string),
            body_excerpt: outcome.body_excerpt().map(ToString::to_string),
            failed_checks: outcome
                .checks()
                .iter()
                .filter(|c| !c.passed)
                .map(|c| c.name.clone())
                .collect(),
        }
    }
}

/// The final state of every metric, taken once when the run is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds between the aggregator being created and being finalized.
    pub elapsed_s: f64,
    pub metrics: BTreeMap<String, MetricSummary>,
    /// The most recent failures, oldest first.
    pub failure_samples: Vec<FailureSample>,
}

impl MetricsSnapshot {
    pub fn get(&self, name: &str) -> Option<&MetricSummary> {
        self.metrics.get(name)
    }

    pub fn counter(&self, name: &str) -> Option<&CounterSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Counter(c)) => Some(c),
            _ => None,
        }
    }

    pub fn rate(&self, name: &str) -> Option<&RateSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Rate(r)) => Some(r),
            _ => None,
        }
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        match self.metrics.get(name) {
            Some(MetricSummary::Trend(t)) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    series: BTreeMap<String, MetricSeries>,
    failures: VecDeque<FailureSample>,
    finalized: bool,
}

impl AggregatorState {
    fn apply(&mut self, name: &str, observation: Observation) -> bool {
        if let Observation::Sample(value) = observation {
            if !value.is_finite() {
                log::warn!("Ignoring non-finite sample {value} for metric {name}");
                return false;
            }
        }

        let series = self
            .series
            .entry(name.to_string())
            .or_insert_with(|| MetricSeries::new(observation.kind()));

        let kind = series.kind();
        if !series.apply(observation) {
            log::warn!(
                "Ignoring {} observation for {kind} metric {name}",
                observation.kind()
            );
            return false;
        }

        true
    }
}

/// Collects observations from every worker into per-metric series.
///
/// All methods take `&self` and may be called concurrently. Once [MetricsAggregator::finalize] has
/// been called, further observations are rejected so the snapshot stays exact.
#[derive(Debug)]
pub struct MetricsAggregator {
    started: Instant,
    state: Mutex<AggregatorState>,
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            state: Mutex::new(AggregatorState::default()),
        }
    }

    /// Record a single observation. Returns false if it was rejected.
    pub fn observe(&self, name: &str, observation: Observation) -> bool {
        let mut state = self.state.lock();
        if state.finalized {
            log::debug!("Rejecting observation for {name} after metrics were finalized");
            return false;
        }

        state.apply(name, observation)
    }

    pub fn add_counter(&self, name: &str, value: u64) -> bool {
        self.observe(name, Observation::Count(value))
    }

    pub fn add_rate(&self, name: &str, value: bool) -> bool {
        self.observe(name, Observation::Rate(value))
    }

    pub fn add_trend(&self, name: &str, value: f64) -> bool {
        self.observe(name, Observation::Sample(value))
    }

    /// Record the standard HTTP metrics for an outcome together with its own observations.
    ///
    /// Everything for one outcome is applied under a single lock, so a snapshot never contains half
    /// of an outcome.
    pub fn record_outcome(&self, outcome: &RequestOutcome) -> bool {
        let mut state = self.state.lock();
        if state.finalized {
            log::debug!(
                "Rejecting {} outcome after metrics were finalized",
                outcome.scenario_name()
            );
            return false;
        }

        state.apply(names::HTTP_REQS, Observation::Count(1));
        if outcome.status_code().is_some() {
            state.apply(
                names::HTTP_REQ_DURATION,
                Observation::duration(outcome.duration()),
            );
        }
        state.apply(
            names::HTTP_REQ_FAILED,
            Observation::Rate(outcome.is_http_failure()),
        );
        state.apply(names::ERRORS, Observation::Rate(!outcome.success()));
        for check in outcome.checks() {
            state.apply(names::CHECKS, Observation::Rate(check.passed));
        }
        for (name, observation) in outcome.observations() {
            state.apply(name, *observation);
        }

        if !outcome.success() {
            if state.failures.len() == FAILURE_SAMPLE_LIMIT {
                state.failures.pop_front();
            }
            state.failures.push_back(FailureSample::from_outcome(outcome));
        }

        true
    }

    /// Record that a worker completed an iteration. `hook_failed` is set when the scenario hook
    /// returned an error instead of an outcome.
    pub fn record_iteration(&self, duration: Duration, hook_failed: bool) -> bool {
        let mut state = self.state.lock();
        if state.finalized {
            return false;
        }

        state.apply(names::ITERATIONS, Observation::Count(1));
        state.apply(names::ITERATION_DURATION, Observation::duration(duration));
        if hook_failed {
            state.apply(names::ITERATION_ERRORS, Observation::Count(1));
        }

        true
    }

    /// Close the aggregator and compute the final statistics.
    ///
    /// Can only be called once. Observations made after this call are rejected.
    pub fn finalize(&self) -> anyhow::Result<MetricsSnapshot> {
        let mut state = self.state.lock();
        if state.finalized {
            anyhow::bail!("Metrics have already been finalized");
        }
        state.finalized = true;

        let elapsed = self.started.elapsed();
        let series = std::mem::take(&mut state.series);
        let failures = std::mem::take(&mut state.failures);
        drop(state);

        Ok(MetricsSnapshot {
            elapsed_s: elapsed.as_secs_f64(),
            metrics: series
                .into_iter()
                .map(|(name, series)| (name, series.summarize(elapsed)))
                .collect(),
            failure_samples: failures.into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::outcome::CheckResult;

    fn outcome(success: bool) -> RequestOutcome {
        RequestOutcome::new(
            "CreateOrder",
            Duration::from_millis(20),
            Some(200),
            vec![CheckResult::new("has data", success)],
        )
    }

    #[test]
    fn test_should_count_outcomes_exactly() {
        let aggregator = MetricsAggregator::new();
        for i in 0..1000 {
            aggregator.record_outcome(&outcome(i % 10 < 7));
        }

        let snapshot = aggregator.finalize().unwrap();

        assert_eq!(1000, snapshot.counter(names::HTTP_REQS).unwrap().count);
        let errors = snapshot.rate(names::ERRORS).unwrap();
        assert_eq!(0.3, errors.rate);
        assert_eq!(300, errors.passes);
        assert_eq!(1000, errors.total());
        assert_eq!(0.0, snapshot.rate(names::HTTP_REQ_FAILED).unwrap().rate);
    }

    #[test]
    fn test_should_not_lose_concurrent_observations() {
        let aggregator = Arc::new(MetricsAggregator::new());

        let handles = (0..8)
            .map(|_| {
                let aggregator = aggregator.clone();
                std::thread::spawn(move || {
                    for i in 0..500 {
                        aggregator.record_outcome(&outcome(i % 2 == 0));
                        aggregator.add_counter("order_creation_success", 1);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = aggregator.finalize().unwrap();
        assert_eq!(4000, snapshot.counter(names::HTTP_REQS).unwrap().count);
        assert_eq!(
            4000,
            snapshot.counter("order_creation_success").unwrap().count
        );
        assert_eq!(4000, snapshot.trend(names::HTTP_REQ_DURATION).unwrap().count);
        assert_eq!(0.5, snapshot.rate(names::ERRORS).unwrap().rate);
    }

    #[test]
    fn test_should_reject_observations_after_finalize() {
        let aggregator = MetricsAggregator::new();
        aggregator.add_counter("http_reqs", 1);

        let snapshot = aggregator.finalize().unwrap();

        assert!(!aggregator.add_counter("http_reqs", 1));
        assert!(!aggregator.record_outcome(&outcome(true)));
        assert!(aggregator.finalize().is_err());
        assert_eq!(1, snapshot.counter("http_reqs").unwrap().count);
    }

    #[test]
    fn test_should_reject_mismatched_kind() {
        let aggregator = MetricsAggregator::new();
        assert!(aggregator.add_counter("orders", 2));
        assert!(!aggregator.add_rate("orders", true));

        let snapshot = aggregator.finalize().unwrap();
        assert_eq!(2, snapshot.counter("orders").unwrap().count);
    }

    #[test]
    fn test_should_interpolate_percentiles() {
        let summary = TrendSummary::from_samples((1..=100).rev().map(f64::from).collect());

        assert_eq!(100, summary.count);
        assert_eq!(50.5, summary.avg);
        assert_eq!(1.0, summary.min);
        assert_eq!(100.0, summary.max);
        assert_eq!(50.5, summary.med);
        assert!((summary.p95 - 95.05).abs() < 1e-9);
        assert!((summary.p99 - 99.01).abs() < 1e-9);
        assert_eq!(Some(100.0), summary.percentile(100.0));
        assert_eq!(Some(1.0), summary.percentile(0.0));
    }

    #[test]
    fn test_should_handle_single_sample() {
        assert_eq!(Some(7.0), percentile(&[7.0], 95.0));
        assert_eq!(None, percentile(&[], 95.0));
    }

    #[test]
    fn test_should_report_zero_rate_without_observations() {
        let summary = MetricSeries::new(MetricKind::Rate).summarize(Duration::from_secs(1));

        assert_eq!(
            MetricSummary::Rate(RateSummary {
                rate: 0.0,
                passes: 0,
                fails: 0
            }),
            summary
        );
    }

    #[test]
    fn test_should_keep_recent_failure_samples() {
        let aggregator = MetricsAggregator::new();
        for status in 0..15u16 {
            let failed = RequestOutcome::new(
                "QueryOrder",
                Duration::from_millis(5),
                Some(500 + status),
                vec![CheckResult::new("query order status is 200", false)],
            );
            aggregator.record_outcome(&failed);
        }
        aggregator.record_outcome(&outcome(true));

        let snapshot = aggregator.finalize().unwrap();

        assert_eq!(FAILURE_SAMPLE_LIMIT, snapshot.failure_samples.len());
        assert_eq!(Some(505), snapshot.failure_samples[0].status_code);
        assert_eq!(Some(514), snapshot.failure_samples[9].status_code);
        assert_eq!(
            vec!["query order status is 200".to_string()],
            snapshot.failure_samples[9].failed_checks
        );
    }

    #[test]
    fn test_should_record_transport_failures_without_duration() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_outcome(
            &RequestOutcome::new("HealthCheck", Duration::from_secs(30), None, vec![])
                .with_error("timed out"),
        );

        let snapshot = aggregator.finalize().unwrap();

        assert!(snapshot.trend(names::HTTP_REQ_DURATION).is_none());
        assert_eq!(1.0, snapshot.rate(names::HTTP_REQ_FAILED).unwrap().rate);
        assert_eq!(
            Some("timed out".to_string()),
            snapshot.failure_samples[0].error
        );
    }

    #[test]
    fn test_should_record_scenario_observations() {
        let aggregator = MetricsAggregator::new();
        aggregator.record_outcome(
            &outcome(true)
                .with_observation("order_creation_time", Observation::Sample(20.0))
                .with_observation("order_creation_success", Observation::Count(1)),
        );
        aggregator.record_iteration(Duration::from_millis(1500), false);
        aggregator.record_iteration(Duration::from_millis(10), true);

        let snapshot = aggregator.finalize().unwrap();

        assert_eq!(20.0, snapshot.trend("order_creation_time").unwrap().avg);
        assert_eq!(1, snapshot.counter("order_creation_success").unwrap().count);
        assert_eq!(2, snapshot.counter(names::ITERATIONS).unwrap().count);
        assert_eq!(1, snapshot.counter(names::ITERATION_ERRORS).unwrap().count);
    }
}
