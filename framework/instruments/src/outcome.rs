use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metrics::Observation;

/// Longest body excerpt kept on an outcome, in characters.
const BODY_EXCERPT_LIMIT: usize = 256;

/// The result of one named boolean check applied to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
}

impl CheckResult {
    pub fn new(name: impl Into<String>, passed: bool) -> Self {
        Self {
            name: name.into(),
            passed,
        }
    }
}

/// Everything the metrics pipeline needs to know about a single HTTP call.
///
/// One outcome is produced per call and handed to the
/// [MetricsAggregator](crate::MetricsAggregator) by value. The call is successful only if a
/// response was received and every check passed.
#[derive(Debug, Clone)]
pub struct RequestOutcome {
    scenario_name: String,
    duration: Duration,
    success: bool,
    status_code: Option<u16>,
    error: Option<String>,
    checks: Vec<CheckResult>,
    body_excerpt: Option<String>,
    observations: Vec<(String, Observation)>,
}

impl RequestOutcome {
    /// Create an outcome for a call. A `status_code` of `None` means no response was received.
    pub fn new(
        scenario_name: impl Into<String>,
        duration: Duration,
        status_code: Option<u16>,
        checks: Vec<CheckResult>,
    ) -> Self {
        let success = status_code.is_some() && checks.iter().all(|c| c.passed);
        Self {
            scenario_name: scenario_name.into(),
            duration,
            success,
            status_code,
            error: None,
            checks,
            body_excerpt: None,
            observations: Vec::new(),
        }
    }

    /// Attach a description of what went wrong, typically a transport error.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Keep a truncated, lossy UTF-8 copy of the response body for failure diagnosis.
    pub fn with_body_excerpt(mut self, body: &[u8]) -> Self {
        self.body_excerpt = Some(excerpt(body, BODY_EXCERPT_LIMIT));
        self
    }

    /// Attach a scenario specific metric observation which is recorded together with the outcome.
    pub fn with_observation(
        mut self,
        metric_name: impl Into<String>,
        observation: Observation,
    ) -> Self {
        self.observations.push((metric_name.into(), observation));
        self
    }

    pub fn scenario_name(&self) -> &str {
        &self.scenario_name
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn checks(&self) -> &[CheckResult] {
        &self.checks
    }

    pub fn body_excerpt(&self) -> Option<&str> {
        self.body_excerpt.as_deref()
    }

    pub fn observations(&self) -> &[(String, Observation)] {
        &self.observations
    }

    /// No response at all, or a response with an error status.
    pub fn is_http_failure(&self) -> bool {
        !matches!(self.status_code, Some(status) if status < 400)
    }
}

fn excerpt(body: &[u8], limit: usize) -> String {
    let text = String::from_utf8_lossy(body);
    let mut chars = text.chars();
    let mut out: String = chars.by_ref().take(limit).collect();
    if chars.next().is_some() {
        out.push_str("...");
    }
    out
}
