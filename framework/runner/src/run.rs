use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use rand::Rng;

use load_tunnel_core::prelude::RunAbortError;
use load_tunnel_instruments::{evaluate, names, MetricsAggregator, ReportRenderer, Verdict};
use load_tunnel_summary_model::{append_run_summary, RunSummary, StageSummary};

use crate::monitor::start_monitor;
use crate::progress::start_progress;
use crate::scheduler::{StageScheduler, WorkerStop};
use crate::think::IterationBudget;
use crate::{
    context::{RunnerContext, UserValuesConstraint, WorkerContext},
    definition::{ScenarioDefinition, ScenarioDefinitionBuilder},
    executor::Executor,
    shutdown::start_shutdown_listener,
};

/// Run a scenario to completion and grade it against its thresholds.
///
/// Returns the [Verdict] once the run has drained, the metrics have been finalized and the report
/// has been printed. Use [Verdict::exit_code] as the process exit code.
///
/// Returns an error if the definition is invalid, the setup hook fails or a scenario aborts the run
/// with a [RunAbortError]. Other scenario errors are logged and counted, they do not stop the run.
pub fn run<RV: UserValuesConstraint, V: UserValuesConstraint>(
    definition: ScenarioDefinitionBuilder<RV, V>,
) -> anyhow::Result<Verdict> {
    let definition = Arc::new(definition.build()?);

    log::info!(
        "Running scenario: {} against {}",
        definition.name,
        definition.connection_string
    );

    let runtime = tokio::runtime::Runtime::new().context("Failed to create Tokio runtime")?;
    let shutdown_handle = start_shutdown_listener(&runtime)?;
    let executor = Arc::new(Executor::new(runtime));
    let metrics = Arc::new(MetricsAggregator::new());
    let started_at = chrono::Utc::now().timestamp();

    let mut runner_context = RunnerContext::new(
        executor.clone(),
        metrics.clone(),
        shutdown_handle.clone(),
        definition.connection_string.clone(),
    );

    if let Some(setup_fn) = definition.setup_fn {
        setup_fn(&mut runner_context)?;
    }

    let runner_context = Arc::new(runner_context);

    let mut scheduler = StageScheduler::new(
        definition.ramp.clone(),
        definition.tick,
        definition.duration_override,
    );

    if !definition.no_progress {
        start_progress(
            scheduler.deadline(),
            scheduler.active_gauge(),
            shutdown_handle.new_listener(),
        );
    }

    // Ready to start spawning workers so start the resource monitor to report high usage which
    // might lead to a misleading outcome.
    start_monitor(shutdown_handle.new_listener());

    let budget = Arc::new(IterationBudget::new(definition.iteration_limit));
    let mut tick_listener = shutdown_handle.new_listener();
    let schedule = scheduler.run(
        |index, stop| {
            let worker_id = format!("worker-{index}");
            let runner_context = runner_context.clone();
            let definition = definition.clone();
            let budget = budget.clone();

            std::thread::Builder::new()
                .name(worker_id.clone())
                .spawn(move || {
                    let mut context = WorkerContext::new(worker_id, runner_context);
                    run_worker(&mut context, &definition, &budget, &stop);
                })
        },
        |tick| executor.sleep_or_shutdown(tick, &mut tick_listener),
    );

    // Every worker has stopped, release the progress and monitor threads.
    shutdown_handle.shutdown();

    if let Some(teardown_fn) = definition.teardown_fn {
        // Don't crash the runner if the teardown fails. We still want the reporting to happen.
        if let Err(e) = teardown_fn(runner_context.clone()) {
            log::error!("Teardown failed: {:?}", e);
        }
    }

    let snapshot = metrics.finalize()?;
    let verdict = evaluate(&snapshot, &definition.thresholds);
    let report = ReportRenderer::new(definition.report_title.clone()).render(&snapshot);

    println!("{}", report.text);
    println!("{verdict}");

    if let Some(path) = &definition.json_summary_path {
        let json = serde_json::json!({
            "scenario": definition.name,
            "verdict": verdict,
            "snapshot": report.structured,
        });
        let written = serde_json::to_vec_pretty(&json)
            .map_err(anyhow::Error::from)
            .and_then(|bytes| std::fs::write(path, bytes).map_err(anyhow::Error::from));
        if let Err(e) = written {
            log::error!("Failed to write JSON summary to {}: {:?}", path.display(), e);
        }
    }

    let schedule = schedule?;

    if let Some(path) = &definition.run_summary_path {
        let mut summary = RunSummary::new(
            definition
                .run_id
                .clone()
                .unwrap_or_else(|| nanoid::nanoid!()),
            definition.name.clone(),
            started_at,
            scheduler.deadline().as_secs(),
            definition
                .ramp
                .stages()
                .iter()
                .map(|s| StageSummary {
                    duration_ms: s.duration.as_millis() as u64,
                    target: s.target,
                })
                .collect(),
            definition.thresholds.iter().map(|t| t.to_string()).collect(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        summary.set_peak_concurrency(schedule.peak_concurrency);
        summary.set_iterations(snapshot.counter(names::ITERATIONS).map_or(0, |c| c.count));
        summary.set_verdict(
            verdict.is_pass(),
            verdict.violations().iter().map(|v| v.to_string()).collect(),
        );
        for key in &definition.capture_env {
            if let Ok(value) = std::env::var(key) {
                summary.add_env(key.clone(), value);
            }
        }

        if let Err(e) = append_run_summary(&summary, path) {
            log::error!("Failed to append run summary to {}: {:?}", path.display(), e);
        }
    }

    if let Some(reason) = runner_context.abort_reason() {
        log::error!("Run aborted: {reason}");
        return Err(RunAbortError::new(reason).into());
    }

    log::info!(
        "Scenario {} finished after {:?} with {} workers at peak: {}",
        definition.name,
        schedule.elapsed,
        schedule.peak_concurrency,
        if verdict.is_pass() { "PASS" } else { "FAIL" }
    );

    Ok(verdict)
}

fn run_worker<RV: UserValuesConstraint, V: UserValuesConstraint>(
    context: &mut WorkerContext<RV, V>,
    definition: &ScenarioDefinition<RV, V>,
    budget: &IterationBudget,
    stop: &WorkerStop,
) {
    log::debug!("Starting {}", context.worker_id());

    if let Some(setup_worker_fn) = definition.setup_worker_fn {
        if let Err(e) = setup_worker_fn(context) {
            log::error!("Worker setup failed for {}: {:?}", context.worker_id(), e);
            return;
        }
    }

    let mut rng = rand::thread_rng();
    loop {
        if stop.is_stopped() {
            break;
        }

        if !budget.try_claim() {
            log::info!("Iteration limit reached, stopping the run");
            context.runner_context().force_stop_scenario();
            break;
        }

        context.next_iteration();
        let started = Instant::now();
        let result = definition.dispatcher.dispatch(rng.gen::<f64>(), context);
        let metrics = context.runner_context().metrics();

        match result {
            Ok(outcome) => {
                metrics.record_outcome(&outcome);
                metrics.record_iteration(started.elapsed(), false);
            }
            Err(e) if e.is::<RunAbortError>() => {
                let reason = e
                    .downcast_ref::<RunAbortError>()
                    .map(|a| a.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                log::error!("{} aborted the run: {:?}", context.worker_id(), e);
                context.runner_context().abort(reason);
                break;
            }
            Err(e) => {
                log::error!("Scenario failed for {}: {:?}", context.worker_id(), e);
                metrics.record_iteration(started.elapsed(), true);
            }
        }

        let think_time = definition.think_time.sample(&mut rng);
        if !think_time.is_zero() && stop.wait_timeout(think_time) {
            break;
        }
    }

    if let Some(teardown_worker_fn) = definition.teardown_worker_fn {
        if let Err(e) = teardown_worker_fn(context) {
            log::error!("Worker teardown failed for {}: {:?}", context.worker_id(), e);
        }
    }

    log::debug!(
        "Stopped {} after {} iterations",
        context.worker_id(),
        context.iteration()
    );
}
