use std::{fmt::Debug, sync::Arc};

use parking_lot::Mutex;

use load_tunnel_core::prelude::ShutdownHandle;
use load_tunnel_instruments::MetricsAggregator;

use crate::executor::Executor;

pub trait UserValuesConstraint: Default + Debug + Send + Sync + 'static {}

/// State shared by every worker for the lifetime of a run.
#[derive(Debug)]
pub struct RunnerContext<RV: UserValuesConstraint> {
    executor: Arc<Executor>,
    metrics: Arc<MetricsAggregator>,
    shutdown_handle: ShutdownHandle,
    connection_string: String,
    abort_reason: Mutex<Option<String>>,
    value: RV,
}

impl<RV: UserValuesConstraint> RunnerContext<RV> {
    pub(crate) fn new(
        executor: Arc<Executor>,
        metrics: Arc<MetricsAggregator>,
        shutdown_handle: ShutdownHandle,
        connection_string: String,
    ) -> Self {
        Self {
            executor,
            metrics,
            shutdown_handle,
            connection_string,
            abort_reason: Mutex::new(None),
            value: Default::default(),
        }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn metrics(&self) -> &Arc<MetricsAggregator> {
        &self.metrics
    }

    /// The base URL of the service under test.
    pub fn get_connection_string(&self) -> &str {
        &self.connection_string
    }

    /// End the run early. Workers finish their current iteration and the run drains as if the
    /// deadline had passed.
    pub fn force_stop_scenario(&self) {
        self.shutdown_handle.shutdown();
    }

    /// Record a fatal error and stop the run. Only the first reason is kept.
    pub(crate) fn abort(&self, reason: impl Into<String>) {
        let mut abort_reason = self.abort_reason.lock();
        if abort_reason.is_none() {
            *abort_reason = Some(reason.into());
        }
        drop(abort_reason);

        self.shutdown_handle.shutdown();
    }

    pub(crate) fn abort_reason(&self) -> Option<String> {
        self.abort_reason.lock().clone()
    }

    pub fn get_mut(&mut self) -> &mut RV {
        &mut self.value
    }

    pub fn get(&self) -> &RV {
        &self.value
    }
}

/// State owned by a single virtual worker.
#[derive(Debug)]
pub struct WorkerContext<RV: UserValuesConstraint, V: UserValuesConstraint> {
    worker_id: String,
    iteration: u64,
    runner_context: Arc<RunnerContext<RV>>,
    value: V,
}

impl<RV: UserValuesConstraint, V: UserValuesConstraint> WorkerContext<RV, V> {
    pub(crate) fn new(worker_id: String, runner_context: Arc<RunnerContext<RV>>) -> Self {
        Self {
            worker_id,
            iteration: 0,
            runner_context,
            value: Default::default(),
        }
    }

    /// A value which uniquely identifies this worker within the run, such as `worker-3`.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// The number of iterations this worker has started, including the current one.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub(crate) fn next_iteration(&mut self) {
        self.iteration += 1;
    }

    pub fn runner_context(&self) -> &Arc<RunnerContext<RV>> {
        &self.runner_context
    }

    pub fn get_mut(&mut self) -> &mut V {
        &mut self.value
    }

    pub fn get(&self) -> &V {
        &self.value
    }
}
