use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use rand::{thread_rng, Rng};

use load_tunnel_runner::prelude::{
    HookResult, RequestOutcome, RunAbortError, RunnerContext, ScenarioResult, WorkerContext,
};
use order_client_instrumented::prelude::{
    CreatedOrder, HealthPolicy, NewOrder, OrderApi, ReqwestTransport,
};

use crate::config::{merchant_credentials_from_env, OrderApiDefaults};
use crate::context::OrderWorkerContext;
use crate::correlation::CorrelationStore;
use crate::runner_context::OrderRunnerContext;

/// Prefix for order numbers created under load.
pub const LOAD_TEST_PREFIX: &str = "LOADTEST";
/// Prefix for order numbers created by a smoke test.
pub const SMOKE_TEST_PREFIX: &str = "TEST";
/// Amount, in cents, of every smoke test order.
pub const SMOKE_TEST_AMOUNT: i64 = 10_000;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub type OrderWorker = WorkerContext<OrderRunnerContext, OrderWorkerContext>;

/// Sets up the [OrderApi] in [OrderRunnerContext] for the base URL of the run.
///
/// Use this as the scenario `setup` hook. Merchant credentials are read from `MERCHANT_ID`,
/// `CHANNEL_ID` and `MERCHANT_KEY`, falling back to [OrderApiDefaults::default].
///
/// ```rust,no_run
/// use order_load_runner::prelude::*;
///
/// let builder =
///     ScenarioDefinitionBuilder::<OrderRunnerContext, OrderWorkerContext>::new_with_init("docs")
///         .use_setup(configure_order_api)
///         .use_scenario(CREATE_ORDER, create_order);
/// ```
pub fn configure_order_api(ctx: &mut RunnerContext<OrderRunnerContext>) -> HookResult {
    configure_order_api_with(ctx, OrderApiDefaults::default())
}

/// As [configure_order_api], but with the credentials seeded for local smoke testing.
pub fn configure_smoke_order_api(ctx: &mut RunnerContext<OrderRunnerContext>) -> HookResult {
    configure_order_api_with(ctx, OrderApiDefaults::smoke_test())
}

/// Method:
/// - Resolves the merchant credentials from the environment and `defaults`.
/// - Builds a reqwest transport with a 60 second request timeout.
/// - Validates the base URL from the context.
/// - Signs a throwaway order, so that a broken signer stops the run before any traffic is sent.
pub fn configure_order_api_with(
    ctx: &mut RunnerContext<OrderRunnerContext>,
    defaults: OrderApiDefaults,
) -> HookResult {
    let credentials = merchant_credentials_from_env(defaults)?;
    log::info!(
        "Testing {} as merchant {} on channel {}",
        ctx.get_connection_string(),
        credentials.merchant_id,
        credentials.channel_id
    );

    let transport = ReqwestTransport::new(REQUEST_TIMEOUT).context("Failed to build HTTP client")?;
    let api = OrderApi::new(Arc::new(transport), ctx.get_connection_string(), credentials)
        .with_context(|| format!("Invalid base URL: {}", ctx.get_connection_string()))?;

    api.signed_order(&NewOrder::with_amount("SIGNCHECK", 1, &mut thread_rng()))
        .context("Unable to sign order requests")?;

    ctx.get_mut().set_api(api);

    Ok(())
}

/// Create an order with a random amount and remember its order number for later queries.
pub fn create_order(ctx: &mut OrderWorker) -> ScenarioResult {
    let order = NewOrder::random(LOAD_TEST_PREFIX, &mut thread_rng());
    submit_order(ctx, order)
}

/// Create a fixed amount order, as used by the single order smoke test.
pub fn create_smoke_order(ctx: &mut OrderWorker) -> ScenarioResult {
    let order = NewOrder::with_amount(SMOKE_TEST_PREFIX, SMOKE_TEST_AMOUNT, &mut thread_rng());
    submit_order(ctx, order)
}

/// Query an order created earlier in the run.
///
/// If no order has been created yet then an order is created instead, so the iteration still
/// produces traffic and the store starts filling.
pub fn query_order(ctx: &mut OrderWorker) -> ScenarioResult {
    let api = order_api(ctx)?;
    let orders = ctx.runner_context().get().orders().clone();

    let queried = ctx
        .runner_context()
        .executor()
        .execute_in_place(async { query_random_order(&api, &orders, &mut thread_rng()).await })?;

    match queried {
        QueryOutcome::Queried(outcome) => Ok(outcome),
        QueryOutcome::Created(created) => Ok(record_created(ctx, created)),
    }
}

/// Health check that only requires a 200.
pub fn health_check(ctx: &mut OrderWorker) -> ScenarioResult {
    check_health(ctx, HealthPolicy::status_only())
}

/// Health check that also requires a fast response which reports the database status.
pub fn strict_health_check(ctx: &mut OrderWorker) -> ScenarioResult {
    check_health(ctx, HealthPolicy::strict())
}

pub fn report_orders_created(ctx: &mut OrderWorker) -> HookResult {
    log::info!(
        "Worker {} created {} orders, last order: {}",
        ctx.worker_id(),
        ctx.get().orders_created(),
        ctx.get().last_order_no().unwrap_or("none")
    );

    Ok(())
}

/// What a query iteration ended up doing.
#[derive(Debug)]
pub(crate) enum QueryOutcome {
    Queried(RequestOutcome),
    Created(CreatedOrder),
}

/// Submit `order` and append the assigned order number to `orders` once the call has returned.
///
/// A signing failure aborts the run, every later request would fail the same way.
pub(crate) async fn create_and_record(
    api: &OrderApi,
    orders: &CorrelationStore,
    order: &NewOrder,
) -> anyhow::Result<CreatedOrder> {
    let created = api.create_order(order).await.map_err(|e| {
        RunAbortError::new(format!("Failed to sign order {}: {e}", order.mch_order_no))
    })?;

    if let Some(order_no) = &created.order_no {
        orders.append(order_no.clone());
    }

    Ok(created)
}

pub(crate) async fn query_random_order(
    api: &OrderApi,
    orders: &CorrelationStore,
    rng: &mut impl Rng,
) -> anyhow::Result<QueryOutcome> {
    match orders.random(rng) {
        Some(order_no) => Ok(QueryOutcome::Queried(api.query_order(&order_no).await)),
        None => {
            log::debug!("No orders created yet, creating one instead of querying");
            let order = NewOrder::random(LOAD_TEST_PREFIX, rng);
            Ok(QueryOutcome::Created(
                create_and_record(api, orders, &order).await?,
            ))
        }
    }
}

fn submit_order(ctx: &mut OrderWorker, order: NewOrder) -> ScenarioResult {
    let api = order_api(ctx)?;
    let orders = ctx.runner_context().get().orders().clone();

    let created = ctx
        .runner_context()
        .executor()
        .execute_in_place(async { create_and_record(&api, &orders, &order).await })?;

    Ok(record_created(ctx, created))
}

fn check_health(ctx: &mut OrderWorker, policy: HealthPolicy) -> ScenarioResult {
    let api = order_api(ctx)?;

    ctx.runner_context()
        .executor()
        .execute_in_place(async { Ok(api.health_check(policy).await) })
}

fn record_created(ctx: &mut OrderWorker, created: CreatedOrder) -> RequestOutcome {
    if let Some(order_no) = created.order_no {
        ctx.get_mut().record_created(order_no);
    }

    created.outcome
}

fn order_api(ctx: &OrderWorker) -> anyhow::Result<Arc<OrderApi>> {
    ctx.runner_context()
        .get()
        .api()
        .cloned()
        .context("Order API is not configured, call 'configure_order_api' in the scenario 'setup'")
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use order_client_instrumented::prelude::{
        HttpMethod, MerchantCredentials, MockTransport, CREATE_ORDER, QUERY_ORDER,
    };

    use super::*;

    const CREATED: &str =
        r#"{"code":200,"data":{"order_no":"P1001","pay_url":"https://pay.example.com"}}"#;
    const FOUND: &str = r#"{"code":200,"data":{"order_no":"P1001","status":"PAYING"}}"#;

    fn api(transport: Arc<MockTransport>) -> OrderApi {
        OrderApi::new(
            transport,
            "http://localhost:8080",
            MerchantCredentials {
                merchant_id: 1,
                channel_id: 1,
                key: "your_merchant_key".to_string(),
            },
        )
        .unwrap()
    }

    fn transport() -> Arc<MockTransport> {
        Arc::new(
            MockTransport::new()
                .with_response(HttpMethod::Post, "/api/v1/orders", 200, CREATED)
                .with_response(HttpMethod::Get, "/api/v1/orders/P1001", 200, FOUND),
        )
    }

    #[tokio::test]
    async fn test_should_create_instead_of_query_when_store_is_empty() {
        let transport = transport();
        let api = api(transport.clone());
        let orders = CorrelationStore::new();

        let outcome = query_random_order(&api, &orders, &mut StdRng::seed_from_u64(7))
            .await
            .unwrap();

        match outcome {
            QueryOutcome::Created(created) => {
                assert_eq!(CREATE_ORDER, created.outcome.scenario_name());
                assert_eq!(Some("P1001".to_string()), created.order_no);
            }
            QueryOutcome::Queried(_) => panic!("expected a create"),
        }
        assert_eq!(1, transport.count(HttpMethod::Post, "/api/v1/orders"));
        assert_eq!(0, transport.count(HttpMethod::Get, "/api/v1/orders"));
        assert_eq!(1, orders.len());
    }

    #[tokio::test]
    async fn test_should_query_a_created_order() {
        let transport = transport();
        let api = api(transport.clone());
        let orders = CorrelationStore::new();
        orders.append("P1001".to_string());

        let outcome = query_random_order(&api, &orders, &mut StdRng::seed_from_u64(7))
            .await
            .unwrap();

        match outcome {
            QueryOutcome::Queried(outcome) => {
                assert_eq!(QUERY_ORDER, outcome.scenario_name());
                assert!(outcome.success());
            }
            QueryOutcome::Created(_) => panic!("expected a query"),
        }
        assert_eq!(0, transport.count(HttpMethod::Post, "/api/v1/orders"));
        assert_eq!(1, transport.count(HttpMethod::Get, "/api/v1/orders/P1001"));
    }

    #[tokio::test]
    async fn test_should_not_record_rejected_orders() {
        let transport = Arc::new(MockTransport::new().with_response(
            HttpMethod::Post,
            "/api/v1/orders",
            200,
            r#"{"code":400,"message":"invalid sign"}"#,
        ));
        let api = api(transport);
        let orders = CorrelationStore::new();

        let created = create_and_record(
            &api,
            &orders,
            &NewOrder::random(LOAD_TEST_PREFIX, &mut StdRng::seed_from_u64(3)),
        )
        .await
        .unwrap();

        assert!(!created.outcome.success());
        assert_eq!(None, created.order_no);
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_should_record_order_after_create() {
        let api = api(transport());
        let orders = CorrelationStore::new();
        let order = NewOrder::with_amount(
            SMOKE_TEST_PREFIX,
            SMOKE_TEST_AMOUNT,
            &mut StdRng::seed_from_u64(3),
        );

        let created = create_and_record(&api, &orders, &order).await.unwrap();

        assert!(created.outcome.success());
        assert!(order.mch_order_no.starts_with("TEST_"));
        assert_eq!(10_000, order.amount);
        assert_eq!(Some("P1001".to_string()), orders.random(&mut StdRng::seed_from_u64(1)));
    }
}
