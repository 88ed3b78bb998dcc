use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use load_tunnel_instruments::CheckResult;

use crate::transport::{HttpResponse, TransportError};

/// The `{code, data}` envelope every order API response uses.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ApiEnvelope {
    pub code: Option<i64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ApiEnvelope {
    /// `None` for bodies that are not a JSON envelope.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// `code == 200` and a non-null `data` field.
    pub fn has_data(&self) -> bool {
        self.code == Some(200) && self.data.is_some()
    }

    pub fn order_no(&self) -> Option<&str> {
        if !self.has_data() {
            return None;
        }

        self.data
            .as_ref()?
            .get("order_no")?
            .as_str()
            .filter(|s| !s.is_empty())
    }
}

/// Collects named boolean checks over the result of one call.
///
/// Every check is total: a transport error or an unparseable body makes the check fail rather than
/// erroring.
#[derive(Debug)]
pub struct ResponseChecks<'a> {
    response: Result<&'a HttpResponse, &'a TransportError>,
    envelope: Option<ApiEnvelope>,
    results: Vec<CheckResult>,
}

impl<'a> ResponseChecks<'a> {
    pub fn new(response: Result<&'a HttpResponse, &'a TransportError>) -> Self {
        let envelope = response.ok().and_then(|r| ApiEnvelope::parse(&r.body));
        Self {
            response,
            envelope,
            results: Vec::new(),
        }
    }

    pub fn status_is(mut self, name: &str, status: u16) -> Self {
        let passed = matches!(self.response, Ok(r) if r.status == status);
        self.results.push(CheckResult::new(name, passed));
        self
    }

    pub fn has_data(mut self, name: &str) -> Self {
        let passed = self.envelope.as_ref().is_some_and(ApiEnvelope::has_data);
        self.results.push(CheckResult::new(name, passed));
        self
    }

    pub fn has_order_no(mut self, name: &str) -> Self {
        let passed = self.envelope.as_ref().and_then(ApiEnvelope::order_no).is_some();
        self.results.push(CheckResult::new(name, passed));
        self
    }

    pub fn faster_than(mut self, name: &str, limit: Duration) -> Self {
        let passed = matches!(self.response, Ok(r) if r.duration < limit);
        self.results.push(CheckResult::new(name, passed));
        self
    }

    /// The body is a JSON object with `field` present, whatever its value.
    pub fn has_field(mut self, name: &str, field: &str) -> Self {
        let passed = match self.response {
            Ok(r) => serde_json::from_slice::<Value>(&r.body)
                .ok()
                .and_then(|v| v.as_object().map(|o| o.contains_key(field)))
                .unwrap_or(false),
            Err(_) => false,
        };
        self.results.push(CheckResult::new(name, passed));
        self
    }

    pub fn finish(self) -> (Vec<CheckResult>, Option<ApiEnvelope>) {
        (self.results, self.envelope)
    }
}
