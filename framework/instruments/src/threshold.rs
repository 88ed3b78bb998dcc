use std::fmt::{Display, Formatter};
use std::process::ExitCode;

use serde::{Serialize, Serializer};

use crate::metrics::{MetricSummary, MetricsSnapshot};

/// Exit code used when the run completed but at least one threshold was violated.
const THRESHOLD_FAILED_EXIT_CODE: u8 = 99;

/// The statistic of a metric that a threshold is checked against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Statistic {
    /// `p(N)` of a trend.
    Percentile(f64),
    Avg,
    Min,
    Max,
    Med,
    /// Number of samples of a trend, observations of a rate or value of a counter.
    Count,
    /// Rate of a rate metric, or per second rate of a counter.
    Rate,
}

impl Display for Statistic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Statistic::Percentile(p) => write!(f, "p({p})"),
            Statistic::Avg => write!(f, "avg"),
            Statistic::Min => write!(f, "min"),
            Statistic::Max => write!(f, "max"),
            Statistic::Med => write!(f, "med"),
            Statistic::Count => write!(f, "count"),
            Statistic::Rate => write!(f, "rate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(&self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThresholdParseError {
    #[error("Threshold `{0}` has no comparison operator")]
    MissingOperator(String),
    #[error("Threshold `{0}` uses an unknown statistic")]
    UnknownStatistic(String),
    #[error("Threshold `{0}` has a percentile outside 0-100")]
    InvalidPercentile(String),
    #[error("Threshold `{0}` has a limit that is not a number")]
    InvalidLimit(String),
}

/// A pass/fail criterion on one metric, such as `http_req_duration: p(95)<500`.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub metric_name: String,
    pub statistic: Statistic,
    pub comparison: Comparison,
    pub limit: f64,
}

impl ThresholdSpec {
    pub fn new(
        metric_name: impl Into<String>,
        statistic: Statistic,
        comparison: Comparison,
        limit: f64,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            statistic,
            comparison,
            limit,
        }
    }

    /// Parse an expression like `p(95)<500` or `rate<0.01` for the named metric.
    pub fn parse(metric_name: &str, expression: &str) -> Result<Self, ThresholdParseError> {
        let op_index = expression
            .find(['<', '>'])
            .ok_or_else(|| ThresholdParseError::MissingOperator(expression.to_string()))?;
        let (lhs, rest) = expression.split_at(op_index);
        let (comparison, rhs) = match (rest.starts_with('<'), rest[1..].starts_with('=')) {
            (true, true) => (Comparison::Le, &rest[2..]),
            (true, false) => (Comparison::Lt, &rest[1..]),
            (false, true) => (Comparison::Ge, &rest[2..]),
            (false, false) => (Comparison::Gt, &rest[1..]),
        };

        let statistic = parse_statistic(lhs.trim(), expression)?;
        let limit = rhs
            .trim()
            .parse::<f64>()
            .map_err(|_| ThresholdParseError::InvalidLimit(expression.to_string()))?;

        Ok(Self::new(metric_name, statistic, comparison, limit))
    }

    /// The value of this spec's statistic in a metric summary, or `None` if the statistic does
    /// not apply to that kind of metric.
    fn observe(&self, summary: &MetricSummary) -> Option<f64> {
        match (summary, self.statistic) {
            (MetricSummary::Trend(t), Statistic::Percentile(p)) => t.percentile(p),
            (MetricSummary::Trend(t), Statistic::Avg) => Some(t.avg),
            (MetricSummary::Trend(t), Statistic::Min) => Some(t.min),
            (MetricSummary::Trend(t), Statistic::Max) => Some(t.max),
            (MetricSummary::Trend(t), Statistic::Med) => Some(t.med),
            (MetricSummary::Trend(t), Statistic::Count) => Some(t.count as f64),
            (MetricSummary::Rate(r), Statistic::Rate) => Some(r.rate),
            (MetricSummary::Rate(r), Statistic::Count) => Some(r.total() as f64),
            (MetricSummary::Counter(c), Statistic::Count) => Some(c.count as f64),
            (MetricSummary::Counter(c), Statistic::Rate) => Some(c.rate),
            _ => None,
        }
    }
}

impl Display for ThresholdSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {}{}{}",
            self.metric_name,
            self.statistic,
            self.comparison.symbol(),
            self.limit
        )
    }
}

impl Serialize for ThresholdSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn parse_statistic(lhs: &str, expression: &str) -> Result<Statistic, ThresholdParseError> {
    match lhs {
        "avg" => Ok(Statistic::Avg),
        "min" => Ok(Statistic::Min),
        "max" => Ok(Statistic::Max),
        "med" => Ok(Statistic::Med),
        "count" => Ok(Statistic::Count),
        "rate" => Ok(Statistic::Rate),
        _ => {
            let p = lhs
                .strip_prefix("p(")
                .and_then(|s| s.strip_suffix(')'))
                .ok_or_else(|| ThresholdParseError::UnknownStatistic(expression.to_string()))?
                .trim()
                .parse::<f64>()
                .map_err(|_| ThresholdParseError::UnknownStatistic(expression.to_string()))?;
            if !(0.0..=100.0).contains(&p) {
                return Err(ThresholdParseError::InvalidPercentile(expression.to_string()));
            }
            Ok(Statistic::Percentile(p))
        }
    }
}

/// A threshold that did not hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub spec: ThresholdSpec,
    /// `None` if the statistic does not apply to the metric's kind.
    pub observed: Option<f64>,
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.observed {
            Some(observed) => write!(
                f,
                "{} observed {:.2} (off by {:.2})",
                self.spec,
                observed,
                (observed - self.spec.limit).abs()
            ),
            None => write!(
                f,
                "{} cannot be evaluated for this kind of metric",
                self.spec
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", content = "violations", rename_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail(Vec<Violation>),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            Verdict::Pass => &[],
            Verdict::Fail(violations) => violations,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            Verdict::Pass => ExitCode::SUCCESS,
            Verdict::Fail(_) => ExitCode::from(THRESHOLD_FAILED_EXIT_CODE),
        }
    }
}

impl Display for Verdict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail(violations) => {
                write!(f, "FAIL: {} threshold(s) violated", violations.len())?;
                for violation in violations {
                    write!(f, "\n  - {violation}")?;
                }
                Ok(())
            }
        }
    }
}

/// Check every threshold against the final snapshot.
///
/// A threshold on a metric that was never observed, or that has no samples, passes. Short runs may
/// legitimately send no traffic of some kind.
pub fn evaluate(snapshot: &MetricsSnapshot, thresholds: &[ThresholdSpec]) -> Verdict {
    let violations = thresholds
        .iter()
        .filter_map(|spec| {
            let summary = snapshot.get(&spec.metric_name)?;
            if is_empty(summary) {
                return None;
            }

            match spec.observe(summary) {
                Some(observed) if spec.comparison.holds(observed, spec.limit) => None,
                observed => Some(Violation {
                    spec: spec.clone(),
                    observed,
                }),
            }
        })
        .collect::<Vec<_>>();

    if violations.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail(violations)
    }
}

fn is_empty(summary: &MetricSummary) -> bool {
    match summary {
        MetricSummary::Trend(t) => t.count == 0,
        MetricSummary::Rate(r) => r.total() == 0,
        MetricSummary::Counter(_) => false,
    }
}
