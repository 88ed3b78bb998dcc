use std::process::ExitCode;
use std::time::Duration;

use order_load_runner::prelude::*;

fn main() -> LoadTunnelResult<ExitCode> {
    let builder = ScenarioDefinitionBuilder::<
        OrderRunnerContext,
        OrderWorkerContext,
    >::new_with_init(env!("CARGO_PKG_NAME"))
    .with_default_connection_string("http://localhost:8080")
    .with_stages(vec![
        Stage::secs(30, 50),
        Stage::mins(2, 150),
        Stage::mins(3, 250),
        Stage::mins(2, 150),
        Stage::secs(30, 0),
    ])
    .with_think_time(Duration::from_secs(1), Duration::from_secs(3))
    .with_threshold("http_req_duration", "p(95)<500")
    .with_threshold("http_req_duration", "p(99)<1000")
    .with_threshold("http_req_failed", "rate<0.01")
    .with_threshold("errors", "rate<0.01")
    .with_report_title("Mixed order traffic load test")
    .add_capture_env(MERCHANT_ID_ENV)
    .add_capture_env(CHANNEL_ID_ENV)
    .use_setup(configure_order_api)
    .use_weighted_scenario(0.7, CREATE_ORDER, create_order)
    .use_weighted_scenario(0.2, QUERY_ORDER, query_order)
    .use_remainder_scenario(HEALTH_CHECK, health_check)
    .use_worker_teardown(report_orders_created)
    .use_teardown(|ctx| {
        log::info!("Created {} orders during the run", ctx.get().orders().len());
        Ok(())
    });

    Ok(run(builder)?.exit_code())
}
