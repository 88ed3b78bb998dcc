mod cli;
mod context;
mod definition;
mod dispatch;
mod executor;
mod init;
mod monitor;
mod progress;
mod ramp;
mod run;
mod scheduler;
mod shutdown;
mod think;
mod types;

pub mod prelude {
    pub use crate::cli::LoadTunnelScenarioCli;
    pub use crate::context::UserValuesConstraint;
    pub use crate::context::{RunnerContext, WorkerContext};
    pub use crate::definition::{HookResult, ScenarioDefinitionBuilder, ScenarioResult};
    pub use crate::dispatch::{ScenarioDispatcher, WeightedDispatcher};
    pub use crate::executor::Executor;
    pub use crate::init::init;
    pub use crate::ramp::{RampProfile, Stage};
    pub use crate::run::run;
    pub use crate::scheduler::{ScheduleReport, SchedulerState, StageScheduler, WorkerStop};
    pub use crate::think::ThinkTime;
    pub use crate::types::LoadTunnelResult;

    pub use load_tunnel_core::prelude::*;
    pub use load_tunnel_instruments::{
        CheckResult, MetricsAggregator, Observation, RequestOutcome, Verdict,
    };
}
