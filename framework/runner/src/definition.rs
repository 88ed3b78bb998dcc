use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use load_tunnel_instruments::{RequestOutcome, ThresholdSpec};

use crate::cli::LoadTunnelScenarioCli;
use crate::context::{RunnerContext, UserValuesConstraint, WorkerContext};
use crate::dispatch::{NamedScenario, ScenarioDispatcher, WeightedDispatcher};
use crate::ramp::{RampProfile, Stage};
use crate::think::ThinkTime;

pub type HookResult = anyhow::Result<()>;
pub type ScenarioResult = anyhow::Result<RequestOutcome>;

pub type GlobalHookMut<RV> = fn(&mut RunnerContext<RV>) -> HookResult;
pub type GlobalHook<RV> = fn(Arc<RunnerContext<RV>>) -> HookResult;
pub type WorkerHookMut<RV, V> = fn(&mut WorkerContext<RV, V>) -> HookResult;
pub type ScenarioHook<RV, V> = fn(&mut WorkerContext<RV, V>) -> ScenarioResult;

const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// The builder for a scenario definition.
///
/// This must be used at the start of a test to define the traffic shape that you want to run.
pub struct ScenarioDefinitionBuilder<RV: UserValuesConstraint, V: UserValuesConstraint> {
    /// The name of the scenario, which should be unique within the test suite.
    ///
    /// Recommended value is `env!("CARGO_PKG_NAME")`.
    name: String,
    /// This value is initialised for you and you cannot change it.
    #[doc(hidden)]
    cli: LoadTunnelScenarioCli,
    /// Used when neither `--connection-string` nor `BASE_URL` is set.
    default_connection_string: Option<String>,
    start_concurrency: usize,
    stages: Vec<Stage>,
    think_time: ThinkTime,
    /// How often the scheduler recomputes the desired concurrency.
    tick: Duration,
    iteration_limit: Option<u64>,
    thresholds: Vec<(String, String)>,
    report_title: Option<String>,
    /// Environment variables recorded in the run summary.
    capture_env: Vec<String>,
    /// Global setup hook for this scenario. It will be run once, before any workers are started.
    /// An error here stops the run before any traffic is sent.
    setup_fn: Option<GlobalHookMut<RV>>,
    /// Setup hook for a worker, which will be run once for each worker as it starts.
    setup_worker_fn: Option<WorkerHookMut<RV, V>>,
    scenarios: WeightedDispatcher<NamedScenario<RV, V>>,
    teardown_worker_fn: Option<WorkerHookMut<RV, V>>,
    /// Global teardown hook, run once after every worker has stopped. Best effort, errors are logged.
    teardown_fn: Option<GlobalHook<RV>>,
}

pub(crate) struct ScenarioDefinition<RV: UserValuesConstraint, V: UserValuesConstraint> {
    pub(crate) name: String,
    pub(crate) connection_string: String,
    pub(crate) ramp: RampProfile,
    pub(crate) duration_override: Option<Duration>,
    pub(crate) think_time: ThinkTime,
    pub(crate) tick: Duration,
    pub(crate) iteration_limit: Option<u64>,
    pub(crate) thresholds: Vec<ThresholdSpec>,
    pub(crate) report_title: String,
    pub(crate) capture_env: Vec<String>,
    pub(crate) no_progress: bool,
    pub(crate) run_id: Option<String>,
    pub(crate) run_summary_path: Option<std::path::PathBuf>,
    pub(crate) json_summary_path: Option<std::path::PathBuf>,
    pub(crate) setup_fn: Option<GlobalHookMut<RV>>,
    pub(crate) setup_worker_fn: Option<WorkerHookMut<RV, V>>,
    pub(crate) dispatcher: ScenarioDispatcher<RV, V>,
    pub(crate) teardown_worker_fn: Option<WorkerHookMut<RV, V>>,
    pub(crate) teardown_fn: Option<GlobalHook<RV>>,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> ScenarioDefinitionBuilder<RV, V> {
    /// Initialise a new scenario definition from the scenario name and command line arguments.
    pub fn new(name: &str, cli: LoadTunnelScenarioCli) -> Self {
        Self {
            name: name.to_string(),
            cli,
            default_connection_string: None,
            start_concurrency: 0,
            stages: Vec::new(),
            think_time: ThinkTime::none(),
            tick: DEFAULT_TICK,
            iteration_limit: None,
            thresholds: Vec::new(),
            report_title: None,
            capture_env: Vec::new(),
            setup_fn: None,
            setup_worker_fn: None,
            scenarios: WeightedDispatcher::new(),
            teardown_worker_fn: None,
            teardown_fn: None,
        }
    }

    /// Initialise logging and parse the command line, then create the builder.
    pub fn new_with_init(name: &str) -> Self {
        Self::new(name, crate::init::init())
    }

    pub fn with_default_connection_string(mut self, connection_string: &str) -> Self {
        self.default_connection_string = Some(connection_string.to_string());
        self
    }

    /// Ramp through `stages`, starting from zero workers.
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.start_concurrency = 0;
        self.stages = stages;
        self
    }

    /// Run a fixed number of workers for `duration`.
    pub fn with_constant_workers(mut self, workers: usize, duration: Duration) -> Self {
        self.start_concurrency = workers;
        self.stages = vec![Stage::new(duration, workers)];
        self
    }

    /// Pause for a random time in `[min, max]` after each iteration.
    pub fn with_think_time(mut self, min: Duration, max: Duration) -> Self {
        self.think_time = ThinkTime::between(min, max);
        self
    }

    pub fn with_tick_interval(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Stop the run once this many iterations have been started across all workers.
    pub fn with_iteration_limit(mut self, limit: u64) -> Self {
        self.iteration_limit = Some(limit);
        self
    }

    /// Add a pass/fail criterion such as `with_threshold("http_req_duration", "p(95)<500")`.
    ///
    /// Expressions are parsed when the run starts and an invalid one fails the run.
    pub fn with_threshold(mut self, metric_name: &str, expression: &str) -> Self {
        self.thresholds
            .push((metric_name.to_string(), expression.to_string()));
        self
    }

    pub fn with_report_title(mut self, title: &str) -> Self {
        self.report_title = Some(title.to_string());
        self
    }

    /// Record the value of an environment variable in the run summary, if it is set.
    pub fn add_capture_env(mut self, key: &str) -> Self {
        self.capture_env.push(key.to_string());
        self
    }

    pub fn use_setup(mut self, setup_fn: GlobalHookMut<RV>) -> Self {
        self.setup_fn = Some(setup_fn);
        self
    }

    pub fn use_worker_setup(mut self, setup_worker_fn: WorkerHookMut<RV, V>) -> Self {
        self.setup_worker_fn = Some(setup_worker_fn);
        self
    }

    /// Run `scenario` for every iteration.
    pub fn use_scenario(self, name: &str, scenario: ScenarioHook<RV, V>) -> Self {
        self.use_remainder_scenario(name, scenario)
    }

    /// Run `scenario` for a `weight` share of iterations. Weights are cumulative in the order they
    /// are added.
    pub fn use_weighted_scenario(
        mut self,
        weight: f64,
        name: &str,
        scenario: ScenarioHook<RV, V>,
    ) -> Self {
        self.scenarios.push_weighted(
            weight,
            NamedScenario {
                name: name.to_string(),
                hook: scenario,
            },
        );
        self
    }

    /// Run `scenario` for whatever share of iterations the weighted scenarios leave over.
    pub fn use_remainder_scenario(mut self, name: &str, scenario: ScenarioHook<RV, V>) -> Self {
        let previous = self.scenarios.set_remainder(NamedScenario {
            name: name.to_string(),
            hook: scenario,
        });

        if let Some(previous) = previous {
            panic!(
                "Remainder scenario [{}] is already defined, cannot add [{}]",
                previous.name, name
            );
        }

        self
    }

    pub fn use_worker_teardown(mut self, teardown_worker_fn: WorkerHookMut<RV, V>) -> Self {
        self.teardown_worker_fn = Some(teardown_worker_fn);
        self
    }

    pub fn use_teardown(mut self, teardown_fn: GlobalHook<RV>) -> Self {
        self.teardown_fn = Some(teardown_fn);
        self
    }

    pub(crate) fn build(self) -> anyhow::Result<ScenarioDefinition<RV, V>> {
        let connection_string = self
            .cli
            .connection_string
            .or(self.default_connection_string)
            .context("No connection string, set --connection-string or BASE_URL")?;

        let ramp = RampProfile::with_start(self.start_concurrency, self.stages)
            .with_context(|| format!("Invalid ramp profile for scenario {}", self.name))?;

        let thresholds = self
            .thresholds
            .iter()
            .map(|(metric_name, expression)| {
                ThresholdSpec::parse(metric_name, expression)
                    .with_context(|| format!("Invalid threshold for {metric_name}: {expression}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        if self.tick.is_zero() {
            anyhow::bail!("The scheduler tick interval must be greater than zero");
        }

        Ok(ScenarioDefinition {
            report_title: self.report_title.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            connection_string,
            ramp,
            duration_override: self.cli.duration.map(Duration::from_secs),
            think_time: self.think_time,
            tick: self.tick,
            iteration_limit: self.iteration_limit,
            thresholds,
            capture_env: self.capture_env,
            no_progress: self.cli.no_progress,
            run_id: self.cli.run_id,
            run_summary_path: self.cli.run_summary_path,
            json_summary_path: self.cli.json_summary_path,
            setup_fn: self.setup_fn,
            setup_worker_fn: self.setup_worker_fn,
            dispatcher: ScenarioDispatcher::new(self.scenarios)?,
            teardown_worker_fn: self.teardown_worker_fn,
            teardown_fn: self.teardown_fn,
        })
    }
}
