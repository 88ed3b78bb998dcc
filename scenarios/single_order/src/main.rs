use std::process::ExitCode;
use std::time::Duration;

use order_load_runner::prelude::*;

/// Sends exactly one signed order to a locally running service.
fn main() -> LoadTunnelResult<ExitCode> {
    let builder = ScenarioDefinitionBuilder::<
        OrderRunnerContext,
        OrderWorkerContext,
    >::new_with_init(env!("CARGO_PKG_NAME"))
    .with_default_connection_string("http://localhost:8888")
    .with_constant_workers(1, Duration::from_secs(60))
    .with_iteration_limit(1)
    .with_threshold("errors", "rate<0.01")
    .with_report_title("Single order smoke test")
    .add_capture_env(MERCHANT_ID_ENV)
    .add_capture_env(CHANNEL_ID_ENV)
    .use_setup(configure_smoke_order_api)
    .use_scenario(CREATE_ORDER, create_smoke_order)
    .use_worker_teardown(report_orders_created);

    Ok(run(builder)?.exit_code())
}
