use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::{Condvar, Mutex};

use crate::ramp::RampProfile;

/// Where the scheduler is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running {
        stage_index: usize,
        stage_elapsed: Duration,
    },
    Draining,
    Done,
}

/// Tells a single worker to stop once its current iteration is done.
#[derive(Debug, Clone, Default)]
pub struct WorkerStop {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl WorkerStop {
    pub fn stop(&self) {
        let (stopped, condvar) = &*self.inner;
        *stopped.lock() = true;
        condvar.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for up to `duration`, returning early if the worker is stopped.
    ///
    /// Returns true if the worker has been stopped.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let (stopped, condvar) = &*self.inner;
        let deadline = Instant::now() + duration;
        let mut guard = stopped.lock();
        while !*guard {
            if condvar.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }

        *guard
    }
}

struct VirtualWorker {
    index: usize,
    stop: WorkerStop,
    handle: JoinHandle<()>,
}

impl VirtualWorker {
    fn join(self) {
        if self.handle.join().is_err() {
            log::error!("worker-{} panicked", self.index);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleReport {
    pub peak_concurrency: usize,
    pub workers_spawned: usize,
    pub elapsed: Duration,
}

/// Drives the number of running workers through a [RampProfile].
///
/// On every tick the desired concurrency is computed from the profile. New workers are spawned to
/// meet it and the most recently started workers are asked to stop when it falls. A stopped worker
/// finishes its in-flight iteration before its thread exits.
///
/// A worker that exits on its own keeps its slot. It is not replaced unless the profile later
/// asks for more workers than have been started for the current level.
pub struct StageScheduler {
    profile: RampProfile,
    tick: Duration,
    deadline: Duration,
    state: SchedulerState,
    active: Vec<VirtualWorker>,
    retiring: Vec<VirtualWorker>,
    /// Workers that exited without being stopped, still counted against the desired concurrency.
    exited: usize,
    spawned: usize,
    peak: usize,
    active_gauge: Arc<AtomicUsize>,
}

impl StageScheduler {
    /// `deadline` shortens the run below the profile's total duration, it cannot extend it.
    pub fn new(profile: RampProfile, tick: Duration, deadline: Option<Duration>) -> Self {
        let total = profile.total_duration();
        Self {
            profile,
            tick,
            deadline: deadline.map_or(total, |d| d.min(total)),
            state: SchedulerState::Idle,
            active: Vec::new(),
            retiring: Vec::new(),
            exited: 0,
            spawned: 0,
            peak: 0,
            active_gauge: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Number of workers that have not been asked to stop, shared for progress reporting.
    pub fn active_gauge(&self) -> Arc<AtomicUsize> {
        self.active_gauge.clone()
    }

    /// Run the profile to completion.
    ///
    /// `spawn` starts a worker thread for the given worker index. `wait` blocks for up to one tick
    /// and returns true if the run should stop early.
    pub fn run<S, W>(&mut self, mut spawn: S, mut wait: W) -> anyhow::Result<ScheduleReport>
    where
        S: FnMut(usize, WorkerStop) -> std::io::Result<JoinHandle<()>>,
        W: FnMut(Duration) -> bool,
    {
        let started = Instant::now();
        let mut failure = None;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                log::info!("Run window of {:?} has elapsed", self.deadline);
                break;
            }

            self.advance(elapsed);
            self.reap();

            if let Err(e) = self.scale_to(self.profile.desired_concurrency(elapsed), &mut spawn) {
                failure = Some(e);
                break;
            }

            if wait(self.tick.min(self.deadline - elapsed)) {
                log::info!("Stop requested, draining workers");
                break;
            }
        }

        self.drain();

        match failure {
            Some(e) => Err(e),
            None => Ok(ScheduleReport {
                peak_concurrency: self.peak,
                workers_spawned: self.spawned,
                elapsed: started.elapsed(),
            }),
        }
    }

    fn advance(&mut self, elapsed: Duration) {
        let Some((stage_index, stage_elapsed)) = self.profile.position(elapsed) else {
            return;
        };

        let entered_stage = match self.state {
            SchedulerState::Running {
                stage_index: current,
                ..
            } => current != stage_index,
            _ => true,
        };
        if entered_stage {
            let stage = self.profile.stages()[stage_index];
            log::info!(
                "Stage {}/{}: moving to {} workers over {:?}",
                stage_index + 1,
                self.profile.stages().len(),
                stage.target,
                stage.duration
            );
        }

        self.state = SchedulerState::Running {
            stage_index,
            stage_elapsed,
        };
    }

    fn scale_to<S>(&mut self, desired: usize, spawn: &mut S) -> anyhow::Result<()>
    where
        S: FnMut(usize, WorkerStop) -> std::io::Result<JoinHandle<()>>,
    {
        // A falling profile releases the slots of exited workers before stopping running ones.
        let excess = (self.active.len() + self.exited).saturating_sub(desired);
        self.exited -= excess.min(self.exited);

        while self.active.len() + self.exited < desired {
            let index = self.spawned;
            let stop = WorkerStop::default();
            let handle = spawn(index, stop.clone())
                .with_context(|| format!("Failed to spawn thread for worker-{index}"))?;
            self.active.push(VirtualWorker {
                index,
                stop,
                handle,
            });
            self.spawned += 1;
        }

        while self.active.len() + self.exited > desired {
            if let Some(worker) = self.active.pop() {
                log::debug!("Stopping worker-{}", worker.index);
                worker.stop.stop();
                self.retiring.push(worker);
            }
        }

        self.peak = self.peak.max(self.active.len());
        self.active_gauge.store(self.active.len(), Ordering::Relaxed);

        Ok(())
    }

    /// Join workers whose threads have exited, either after being stopped or on their own.
    fn reap(&mut self) {
        let (finished, retiring) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition::<Vec<_>, _>(|w| w.handle.is_finished());
        self.retiring = retiring;
        finished.into_iter().for_each(VirtualWorker::join);

        let (finished, active) = std::mem::take(&mut self.active)
            .into_iter()
            .partition::<Vec<_>, _>(|w| w.handle.is_finished());
        self.active = active;
        for worker in finished {
            log::debug!("worker-{} exited before it was stopped", worker.index);
            worker.join();
            self.exited += 1;
        }
    }

    fn drain(&mut self) {
        self.state = SchedulerState::Draining;

        for worker in &self.active {
            worker.stop.stop();
        }
        self.retiring.append(&mut self.active);
        self.active_gauge.store(0, Ordering::Relaxed);

        log::info!("Waiting for {} workers to finish", self.retiring.len());
        for worker in self.retiring.drain(..) {
            worker.join();
        }

        self.state = SchedulerState::Done;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::*;
    use crate::ramp::Stage;

    fn spawn_worker(
        running: Arc<AtomicUsize>,
        max_running: Arc<AtomicUsize>,
    ) -> impl FnMut(usize, WorkerStop) -> std::io::Result<JoinHandle<()>> {
        move |index, stop| {
            let running = running.clone();
            let max_running = max_running.clone();
            std::thread::Builder::new()
                .name(format!("worker-{index}"))
                .spawn(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_running.fetch_max(now, Ordering::SeqCst);
                    while !stop.wait_timeout(Duration::from_millis(5)) {}
                    running.fetch_sub(1, Ordering::SeqCst);
                })
        }
    }

    #[test]
    fn test_should_ramp_workers_and_drain() {
        let profile = RampProfile::new(vec![
            Stage::new(Duration::from_millis(200), 4),
            Stage::new(Duration::from_millis(200), 0),
        ])
        .unwrap();
        let mut scheduler = StageScheduler::new(profile, Duration::from_millis(10), None);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let report = scheduler
            .run(spawn_worker(running.clone(), max_running.clone()), |tick| {
                std::thread::sleep(tick);
                false
            })
            .unwrap();

        assert_eq!(SchedulerState::Done, scheduler.state());
        assert_eq!(4, report.peak_concurrency);
        assert!(max_running.load(Ordering::SeqCst) <= 4);
        assert_eq!(0, running.load(Ordering::SeqCst));
        assert_eq!(0, scheduler.active_gauge().load(Ordering::Relaxed));
    }

    #[test]
    fn test_should_drain_when_stop_requested() {
        let profile = RampProfile::constant(3, Duration::from_secs(60)).unwrap();
        let mut scheduler = StageScheduler::new(profile, Duration::from_millis(10), None);
        let running = Arc::new(AtomicUsize::new(0));
        let max_running = Arc::new(AtomicUsize::new(0));

        let started = Instant::now();
        let report = scheduler
            .run(spawn_worker(running.clone(), max_running), |_| true)
            .unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(3, report.workers_spawned);
        assert_eq!(0, running.load(Ordering::SeqCst));
        assert_eq!(SchedulerState::Done, scheduler.state());
    }

    #[test]
    fn test_should_let_in_flight_iteration_finish() {
        let profile = RampProfile::constant(1, Duration::from_millis(20)).unwrap();
        let mut scheduler = StageScheduler::new(profile, Duration::from_millis(5), None);
        let finished = Arc::new(AtomicBool::new(false));

        let worker_finished = finished.clone();
        scheduler
            .run(
                move |_, _stop| {
                    let finished = worker_finished.clone();
                    std::thread::Builder::new().spawn(move || {
                        // An iteration that ignores the stop signal and outlives the run window.
                        std::thread::sleep(Duration::from_millis(100));
                        finished.store(true, Ordering::SeqCst);
                    })
                },
                |tick| {
                    std::thread::sleep(tick);
                    false
                },
            )
            .unwrap();

        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_should_cap_run_at_deadline() {
        let profile = RampProfile::constant(1, Duration::from_secs(60)).unwrap();
        let scheduler = StageScheduler::new(
            profile,
            Duration::from_millis(10),
            Some(Duration::from_secs(5)),
        );

        assert_eq!(Duration::from_secs(5), scheduler.deadline());
    }

    #[test]
    fn test_should_not_replace_workers_that_exit_on_their_own() {
        let profile = RampProfile::constant(2, Duration::from_millis(300)).unwrap();
        let mut scheduler = StageScheduler::new(profile, Duration::from_millis(10), None);

        let report = scheduler
            .run(
                |_, _stop| std::thread::Builder::new().spawn(|| {}),
                |tick| {
                    std::thread::sleep(tick);
                    false
                },
            )
            .unwrap();

        assert_eq!(2, report.workers_spawned);
        assert_eq!(SchedulerState::Done, scheduler.state());
    }

    #[test]
    fn test_should_spawn_for_increase_after_workers_exit() {
        let profile = RampProfile::new(vec![
            Stage::new(Duration::from_millis(100), 2),
            Stage::new(Duration::from_millis(1), 4),
            Stage::new(Duration::from_millis(200), 4),
        ])
        .unwrap();
        let mut scheduler = StageScheduler::new(profile, Duration::from_millis(10), None);

        let report = scheduler
            .run(
                |_, _stop| std::thread::Builder::new().spawn(|| {}),
                |tick| {
                    std::thread::sleep(tick);
                    false
                },
            )
            .unwrap();

        assert_eq!(4, report.workers_spawned);
    }

    #[test]
    fn test_should_wake_stopped_worker_early() {
        let stop = WorkerStop::default();
        let waiter = stop.clone();
        let handle = std::thread::spawn(move || waiter.wait_timeout(Duration::from_secs(30)));

        stop.stop();

        assert!(handle.join().unwrap());
        assert!(stop.is_stopped());
    }
}
