use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::json;

use load_tunnel_instruments::{Observation, RequestOutcome};

use crate::checks::ResponseChecks;
use crate::sign::{ParameterMap, SignError, SignedParameterSet};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

pub const CREATE_ORDER: &str = "CreateOrder";
pub const QUERY_ORDER: &str = "QueryOrder";
pub const HEALTH_CHECK: &str = "HealthCheck";

pub const ORDER_CREATION_TIME: &str = "order_creation_time";
pub const ORDER_QUERY_TIME: &str = "order_query_time";
pub const HEALTH_CHECK_TIME: &str = "health_check_time";
pub const ORDER_CREATION_SUCCESS: &str = "order_creation_success";
pub const ORDER_CREATION_FAILURE: &str = "order_creation_failure";

const ORDERS_PATH: &str = "/api/v1/orders";
const HEALTH_PATH: &str = "/health";

/// Merchant identity used to sign order requests.
#[derive(Clone)]
pub struct MerchantCredentials {
    pub merchant_id: i64,
    pub channel_id: i64,
    pub key: String,
}

impl Debug for MerchantCredentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantCredentials")
            .field("merchant_id", &self.merchant_id)
            .field("channel_id", &self.channel_id)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// The business fields of a create-order request.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub mch_order_no: String,
    /// In cents
    pub amount: i64,
    pub notify_url: String,
    pub jump_url: String,
    pub extra: String,
    pub compatible: i64,
    pub test: bool,
}

impl NewOrder {
    /// An order with a fresh order number and an amount drawn from `[1000, 100999]`.
    pub fn random(prefix: &str, rng: &mut impl Rng) -> Self {
        let amount = rng.gen_range(1000..=100_999);
        Self::with_amount(prefix, amount, rng)
    }

    pub fn with_amount(prefix: &str, amount: i64, rng: &mut impl Rng) -> Self {
        Self {
            mch_order_no: order_number(prefix, rng),
            amount,
            notify_url: "https://example.com/notify".to_string(),
            jump_url: "https://example.com/jump".to_string(),
            extra: "{}".to_string(),
            compatible: 0,
            test: false,
        }
    }
}

/// `<prefix>_<unix millis>_<0..9999>`
pub fn order_number(prefix: &str, rng: &mut impl Rng) -> String {
    format!(
        "{}_{}_{}",
        prefix,
        chrono::Utc::now().timestamp_millis(),
        rng.gen_range(0..10_000)
    )
}

/// What to require of a health check response beyond a 200 status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HealthPolicy {
    pub max_latency: Option<Duration>,
    pub require_database_field: bool,
}

impl HealthPolicy {
    pub fn status_only() -> Self {
        Self::default()
    }

    /// Status 200, answered within 200ms and reporting a `database` status.
    pub fn strict() -> Self {
        Self {
            max_latency: Some(Duration::from_millis(200)),
            require_database_field: true,
        }
    }
}

/// Result of a create-order call.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub outcome: RequestOutcome,
    /// Set when the service accepted the order and returned its number.
    pub order_no: Option<String>,
}

/// Instrumented client for the order API.
///
/// Every call returns a [RequestOutcome] with its checks evaluated and the scenario metrics
/// attached, ready to hand to the metrics aggregator.
#[derive(Clone)]
pub struct OrderApi {
    transport: Arc<dyn HttpTransport>,
    base: url::Url,
    base_url: String,
    credentials: MerchantCredentials,
}

impl Debug for OrderApi {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderApi")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl OrderApi {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        base_url: &str,
        credentials: MerchantCredentials,
    ) -> Result<Self, url::ParseError> {
        let parsed = url::Url::parse(base_url)?;
        if parsed.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }

        Ok(Self {
            transport,
            base: parsed,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build and sign the request parameters for `order`.
    pub fn signed_order(&self, order: &NewOrder) -> Result<SignedParameterSet, SignError> {
        let params = ParameterMap::from_json(&json!({
            "mchId": self.credentials.merchant_id,
            "channelId": self.credentials.channel_id,
            "mchOrderNo": order.mch_order_no,
            "amount": order.amount,
            "notifyUrl": order.notify_url,
            "jumpUrl": order.jump_url,
            "extra": order.extra,
            "compatible": order.compatible,
            "test": order.test,
        }))?;

        Ok(SignedParameterSet::new(params, &self.credentials.key))
    }

    /// Sign and submit a new order.
    ///
    /// Only signing problems are errors. Transport and protocol failures are reported through the
    /// outcome.
    pub async fn create_order(&self, order: &NewOrder) -> Result<CreatedOrder, SignError> {
        let signed = self.signed_order(order)?;
        let request = HttpRequest::post_json(
            format!("{}{}", self.base_url, ORDERS_PATH),
            &signed.to_json(),
        );

        let (result, duration) = self.send(request).await;
        let (checks, envelope) = ResponseChecks::new(result.as_ref())
            .status_is("create order status is 200", 200)
            .has_order_no("create order has data")
            .finish();
        let order_no = envelope
            .as_ref()
            .and_then(|e| e.order_no())
            .map(str::to_string);

        let outcome = build_outcome(CREATE_ORDER, &result, duration, checks)
            .with_observation(ORDER_CREATION_TIME, Observation::duration(duration));
        let outcome = if outcome.success() {
            log::debug!("Created order {:?} for {}", order_no, order.mch_order_no);
            outcome.with_observation(ORDER_CREATION_SUCCESS, Observation::Count(1))
        } else {
            log::warn!(
                "Order creation failed: {} - {}",
                describe_status(&result),
                outcome.body_excerpt().or(outcome.error()).unwrap_or_default()
            );
            outcome.with_observation(ORDER_CREATION_FAILURE, Observation::Count(1))
        };

        Ok(CreatedOrder { outcome, order_no })
    }

    /// Look up an order by the number the service assigned to it.
    pub async fn query_order(&self, order_no: &str) -> RequestOutcome {
        let request = HttpRequest::get(self.order_url(order_no));

        let (result, duration) = self.send(request).await;
        let (checks, _) = ResponseChecks::new(result.as_ref())
            .status_is("query order status is 200", 200)
            .has_data("query order has data")
            .finish();

        build_outcome(QUERY_ORDER, &result, duration, checks)
            .with_observation(ORDER_QUERY_TIME, Observation::duration(duration))
    }

    pub async fn health_check(&self, policy: HealthPolicy) -> RequestOutcome {
        let request = HttpRequest::get(format!("{}{}", self.base_url, HEALTH_PATH));

        let (result, duration) = self.send(request).await;
        let mut checks =
            ResponseChecks::new(result.as_ref()).status_is("health check status is 200", 200);
        if let Some(limit) = policy.max_latency {
            checks = checks.faster_than(&format!("response time < {}ms", limit.as_millis()), limit);
        }
        if policy.require_database_field {
            checks = checks.has_field("has database status", "database");
        }
        let (checks, _) = checks.finish();

        build_outcome(HEALTH_CHECK, &result, duration, checks)
            .with_observation(HEALTH_CHECK_TIME, Observation::duration(duration))
    }

    /// Send a request, timing it from the caller's side when no response arrives.
    /// The URL of a single order. The order number is percent-encoded as one path segment.
    fn order_url(&self, order_no: &str) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(ORDERS_PATH.split('/').filter(|s| !s.is_empty()))
                .push(order_no);
        }
        url.to_string()
    }

    async fn send(&self, request: HttpRequest) -> (Result<HttpResponse, TransportError>, Duration) {
        log::trace!("{} {}", request.method, request.url);
        let started = Instant::now();
        let result = self.transport.send(request).await;
        let duration = match &result {
            Ok(response) => response.duration,
            Err(_) => started.elapsed(),
        };

        (result, duration)
    }
}

fn build_outcome(
    scenario_name: &str,
    result: &Result<HttpResponse, TransportError>,
    duration: Duration,
    checks: Vec<load_tunnel_instruments::CheckResult>,
) -> RequestOutcome {
    match result {
        Ok(response) => {
            let outcome =
                RequestOutcome::new(scenario_name, duration, Some(response.status), checks);
            if outcome.success() {
                outcome
            } else {
                outcome.with_body_excerpt(&response.body)
            }
        }
        Err(e) => {
            RequestOutcome::new(scenario_name, duration, None, checks).with_error(e.to_string())
        }
    }
}

fn describe_status(result: &Result<HttpResponse, TransportError>) -> String {
    match result {
        Ok(response) => response.status.to_string(),
        Err(_) => "no response".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::mock::MockTransport;
    use crate::sign::sign;
    use crate::transport::HttpMethod;

    fn credentials() -> MerchantCredentials {
        MerchantCredentials {
            merchant_id: 20001,
            channel_id: 8008,
            key: "your_merchant_key".to_string(),
        }
    }

    fn api(transport: Arc<MockTransport>) -> OrderApi {
        OrderApi::new(transport, "http://localhost:8888/", credentials()).unwrap()
    }

    fn fixed_order() -> NewOrder {
        NewOrder {
            mch_order_no: "TEST_1700000000000_42".to_string(),
            amount: 10000,
            notify_url: "https://example.com/notify".to_string(),
            jump_url: "https://example.com/jump".to_string(),
            extra: "{}".to_string(),
            compatible: 0,
            test: false,
        }
    }

    fn observation_names(outcome: &RequestOutcome) -> Vec<&str> {
        outcome
            .observations()
            .iter()
            .map(|(name, _)| name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_should_create_signed_order() {
        let transport = Arc::new(MockTransport::new().with_response(
            HttpMethod::Post,
            "/api/v1/orders",
            200,
            r#"{"code":200,"data":{"order_no":"P20240101","pay_url":"https://pay.example.com"}}"#,
        ));

        let created = api(transport.clone()).create_order(&fixed_order()).await.unwrap();

        assert!(created.outcome.success());
        assert_eq!(Some("P20240101".to_string()), created.order_no);
        assert_eq!(
            vec![ORDER_CREATION_TIME, ORDER_CREATION_SUCCESS],
            observation_names(&created.outcome)
        );

        let requests = transport.requests();
        assert_eq!(1, requests.len());
        assert_eq!("http://localhost:8888/api/v1/orders", requests[0].url);
        let body: serde_json::Value =
            serde_json::from_slice(requests[0].body.as_ref().unwrap()).unwrap();
        assert_eq!("D5C935602DD3CFE595F7DC4AD723F1C2", body["sign"]);
        assert_eq!(20001, body["mchId"]);
        assert_eq!("TEST_1700000000000_42", body["mchOrderNo"]);

        let resigned = sign(&ParameterMap::from_json(&body).unwrap(), "your_merchant_key");
        assert_eq!(body["sign"], resigned.as_str());
    }

    #[tokio::test]
    async fn test_should_fail_create_on_error_envelope() {
        let transport = Arc::new(MockTransport::new().with_response(
            HttpMethod::Post,
            "/api/v1/orders",
            200,
            r#"{"code":400,"message":"签名错误"}"#,
        ));

        let created = api(transport).create_order(&fixed_order()).await.unwrap();

        assert!(!created.outcome.success());
        assert_eq!(None, created.order_no);
        assert_eq!(
            vec![true, false],
            created.outcome.checks().iter().map(|c| c.passed).collect::<Vec<_>>()
        );
        assert_eq!(
            vec![ORDER_CREATION_TIME, ORDER_CREATION_FAILURE],
            observation_names(&created.outcome)
        );
        assert!(created.outcome.body_excerpt().unwrap().contains("签名错误"));
    }

    #[tokio::test]
    async fn test_should_record_transport_failure() {
        let transport = Arc::new(MockTransport::new().with_failure(
            HttpMethod::Post,
            "/api/v1/orders",
            TransportError::Connect("connection refused".to_string()),
        ));

        let created = api(transport).create_order(&fixed_order()).await.unwrap();

        assert!(!created.outcome.success());
        assert!(created.outcome.is_http_failure());
        assert_eq!(None, created.outcome.status_code());
        assert_eq!(
            Some("Connection failed: connection refused"),
            created.outcome.error()
        );
    }

    #[tokio::test]
    async fn test_should_query_order() {
        let transport = Arc::new(MockTransport::new().with_response(
            HttpMethod::Get,
            "/api/v1/orders/P1",
            200,
            r#"{"code":200,"data":{"order_no":"P1","status":1}}"#,
        ));

        let outcome = api(transport.clone()).query_order("P1").await;

        assert!(outcome.success());
        assert_eq!(QUERY_ORDER, outcome.scenario_name());
        assert_eq!(vec![ORDER_QUERY_TIME], observation_names(&outcome));
        assert_eq!("http://localhost:8888/api/v1/orders/P1", transport.requests()[0].url);
    }

    #[tokio::test]
    async fn test_should_encode_order_number_in_query_path() {
        let transport = Arc::new(MockTransport::new());

        api(transport.clone()).query_order("P1/2 x?").await;

        assert_eq!(
            "http://localhost:8888/api/v1/orders/P1%2F2%20x%3F",
            transport.requests()[0].url
        );
    }

    #[tokio::test]
    async fn test_should_fail_query_for_unknown_order() {
        let transport = Arc::new(MockTransport::new());

        let outcome = api(transport).query_order("missing").await;

        assert!(!outcome.success());
        assert_eq!(Some(404), outcome.status_code());
        assert!(outcome.is_http_failure());
    }

    #[tokio::test]
    async fn test_should_apply_strict_health_policy() {
        let transport = Arc::new(MockTransport::new().with_response(
            HttpMethod::Get,
            "/health",
            200,
            r#"{"status":"ok"}"#,
        ));
        let api = api(transport);

        let relaxed = api.health_check(HealthPolicy::status_only()).await;
        let strict = api.health_check(HealthPolicy::strict()).await;

        assert!(relaxed.success());
        assert!(!strict.success());
        assert_eq!(
            vec![
                "health check status is 200",
                "response time < 200ms",
                "has database status"
            ],
            strict.checks().iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_should_fail_slow_health_check() {
        let transport = Arc::new(MockTransport::new().with_slow_response(
            HttpMethod::Get,
            "/health",
            200,
            r#"{"status":"ok","database":"ok"}"#,
            Duration::from_millis(350),
        ));

        let outcome = api(transport).health_check(HealthPolicy::strict()).await;

        assert!(!outcome.success());
        assert!(!outcome.is_http_failure());
    }

    #[test]
    fn test_should_generate_order_numbers() {
        let mut rng = StdRng::seed_from_u64(1);

        let order = NewOrder::random("LOADTEST", &mut rng);

        let parts: Vec<&str> = order.mch_order_no.split('_').collect();
        assert_eq!(3, parts.len());
        assert_eq!("LOADTEST", parts[0]);
        assert!(parts[1].parse::<i64>().unwrap() > 1_600_000_000_000);
        assert!(parts[2].parse::<u32>().unwrap() < 10_000);
        assert!((1000..=100_999).contains(&order.amount));
    }

    #[test]
    fn test_should_reject_invalid_base_url() {
        let transport = Arc::new(MockTransport::new());

        assert!(OrderApi::new(transport, "localhost:8888", credentials()).is_err());
    }

    #[test]
    fn test_should_redact_merchant_key() {
        let debug = format!("{:?}", credentials());

        assert!(!debug.contains("your_merchant_key"));
    }
}
