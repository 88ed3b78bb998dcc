mod metrics_table;

use std::fmt::Write;

use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::metrics::{names, MetricSummary, MetricsSnapshot};
use crate::report::metrics_table::{CounterRow, RateRow, TrendRow};

/// Human readable and structured forms of the same snapshot.
#[derive(Debug, Clone)]
pub struct RenderedReport {
    pub text: String,
    pub structured: serde_json::Value,
}

/// Formats a [MetricsSnapshot] for people and for downstream tooling.
///
/// Rendering is independent from threshold evaluation, nothing here can change a verdict.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    title: String,
    indent: String,
}

impl ReportRenderer {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            indent: " ".to_string(),
        }
    }

    pub fn render(&self, snapshot: &MetricsSnapshot) -> RenderedReport {
        RenderedReport {
            text: self.render_text(snapshot),
            structured: serde_json::to_value(snapshot).unwrap_or_else(|e| {
                log::warn!("Failed to serialize metrics snapshot: {e}");
                serde_json::json!({ "error": e.to_string() })
            }),
        }
    }

    fn render_text(&self, snapshot: &MetricsSnapshot) -> String {
        let indent = &self.indent;
        let rule = "=".repeat(50);
        let mut out = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(out, "\n{indent}{}", self.title);
        let _ = writeln!(out, "{indent}{rule}");

        if let Some(duration) = snapshot.trend(names::HTTP_REQ_DURATION) {
            let _ = writeln!(out, "{indent}Average response time: {:.2}ms", duration.avg);
            let _ = writeln!(out, "{indent}P95 response time: {:.2}ms", duration.p95);
            let _ = writeln!(out, "{indent}P99 response time: {:.2}ms", duration.p99);
        }

        for (name, summary) in &snapshot.metrics {
            if let MetricSummary::Trend(trend) = summary {
                if !is_builtin(name) {
                    let _ = writeln!(out, "{indent}{name} average: {:.2}ms", trend.avg);
                }
            }
        }

        if let Some(requests) = snapshot.counter(names::HTTP_REQS) {
            let _ = writeln!(out, "{indent}Total requests: {}", requests.count);
            let _ = writeln!(out, "{indent}QPS: {:.2}", requests.rate);
        }

        if let Some(failed) = snapshot.rate(names::HTTP_REQ_FAILED) {
            let _ = writeln!(out, "{indent}Error rate: {:.2}%", failed.rate * 100.0);
        }

        for (name, summary) in &snapshot.metrics {
            if let MetricSummary::Counter(counter) = summary {
                if !is_builtin(name) {
                    let _ = writeln!(out, "{indent}{name}: {}", counter.count);
                }
            }
        }

        let _ = writeln!(out, "{indent}{rule}");

        self.render_tables(snapshot, &mut out);
        self.render_failures(snapshot, &mut out);

        out
    }

    fn render_tables(&self, snapshot: &MetricsSnapshot, out: &mut String) {
        let mut trends = Vec::new();
        let mut counters = Vec::new();
        let mut rates = Vec::new();

        for (name, summary) in &snapshot.metrics {
            match summary {
                MetricSummary::Trend(t) => trends.push(TrendRow {
                    metric: name.clone(),
                    count: t.count,
                    avg: t.avg,
                    min: t.min,
                    med: t.med,
                    max: t.max,
                    p90: t.p90,
                    p95: t.p95,
                    p99: t.p99,
                }),
                MetricSummary::Counter(c) => counters.push(CounterRow {
                    metric: name.clone(),
                    count: c.count,
                    rate: c.rate,
                }),
                MetricSummary::Rate(r) => rates.push(RateRow {
                    metric: name.clone(),
                    rate: r.rate,
                    passes: r.passes,
                    fails: r.fails,
                }),
            }
        }

        if !trends.is_empty() {
            let _ = writeln!(out, "\nTrends (ms)\n{}", table(trends));
        }
        if !counters.is_empty() {
            let _ = writeln!(out, "\nCounters\n{}", table(counters));
        }
        if !rates.is_empty() {
            let _ = writeln!(out, "\nRates\n{}", table(rates));
        }
    }

    fn render_failures(&self, snapshot: &MetricsSnapshot, out: &mut String) {
        if snapshot.failure_samples.is_empty() {
            return;
        }

        let _ = writeln!(out, "\nRecent failures");
        for sample in &snapshot.failure_samples {
            let status = sample
                .status_code
                .map(|s| s.to_string())
                .unwrap_or_else(|| "no response".to_string());
            let _ = write!(
                out,
                "{} - {}: [{}]",
                sample.scenario,
                status,
                sample.failed_checks.join(", ")
            );
            if let Some(error) = &sample.error {
                let _ = write!(out, " {error}");
            }
            if let Some(body) = &sample.body_excerpt {
                let _ = write!(out, " {body}");
            }
            out.push('\n');
        }
    }
}

fn table<T: Tabled>(rows: Vec<T>) -> String {
    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.to_string()
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        names::HTTP_REQS
            | names::HTTP_REQ_DURATION
            | names::HTTP_REQ_FAILED
            | names::ERRORS
            | names::CHECKS
            | names::ITERATIONS
            | names::ITERATION_DURATION
            | names::ITERATION_ERRORS
    )
}
