mod metrics;
mod outcome;
mod report;
mod threshold;

pub use metrics::{
    names, percentile, CounterSummary, FailureSample, MetricKind, MetricSummary,
    MetricsAggregator, MetricsSnapshot, Observation, RateSummary, TrendSummary,
};
pub use outcome::{CheckResult, RequestOutcome};
pub use report::{RenderedReport, ReportRenderer};
pub use threshold::{
    evaluate, Comparison, Statistic, ThresholdParseError, ThresholdSpec, Verdict, Violation,
};
