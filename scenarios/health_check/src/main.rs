use std::process::ExitCode;

use order_load_runner::prelude::*;

fn main() -> LoadTunnelResult<ExitCode> {
    let builder = ScenarioDefinitionBuilder::<
        OrderRunnerContext,
        OrderWorkerContext,
    >::new_with_init(env!("CARGO_PKG_NAME"))
    .with_default_connection_string("http://localhost:8080")
    .with_stages(vec![
        Stage::secs(10, 100),
        Stage::mins(1, 500),
        Stage::mins(2, 1000),
        Stage::mins(1, 500),
        Stage::secs(10, 0),
    ])
    .with_threshold("http_req_duration", "p(95)<100")
    .with_threshold("http_req_duration", "p(99)<200")
    .with_threshold("http_req_failed", "rate<0.001")
    .with_threshold("errors", "rate<0.001")
    .with_report_title("Health check load test")
    .use_setup(configure_order_api)
    .use_scenario(HEALTH_CHECK, strict_health_check);

    Ok(run(builder)?.exit_code())
}
