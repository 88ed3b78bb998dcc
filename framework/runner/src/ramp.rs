use std::time::Duration;

use anyhow::bail;

/// A time-boxed step of a [RampProfile]. Concurrency moves linearly from the previous stage's
/// target to this stage's `target` over `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }

    pub fn secs(secs: u64, target: usize) -> Self {
        Self::new(Duration::from_secs(secs), target)
    }

    pub fn mins(mins: u64, target: usize) -> Self {
        Self::new(Duration::from_secs(mins * 60), target)
    }
}

/// An ordered list of [Stage]s starting at run time zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RampProfile {
    start: usize,
    stages: Vec<Stage>,
}

impl RampProfile {
    /// A profile that ramps up from zero workers.
    pub fn new(stages: Vec<Stage>) -> anyhow::Result<Self> {
        Self::with_start(0, stages)
    }

    /// A profile that starts at `start` workers instead of ramping from zero.
    pub fn with_start(start: usize, stages: Vec<Stage>) -> anyhow::Result<Self> {
        if stages.is_empty() {
            bail!("A ramp profile needs at least one stage");
        }
        if let Some(index) = stages.iter().position(|s| s.duration.is_zero()) {
            bail!("Stage {} of the ramp profile has a zero duration", index + 1);
        }

        Ok(Self { start, stages })
    }

    /// Hold `workers` workers for the whole of `duration`.
    pub fn constant(workers: usize, duration: Duration) -> anyhow::Result<Self> {
        Self::with_start(workers, vec![Stage::new(duration, workers)])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages.iter().map(|s| s.duration).sum()
    }

    /// The highest concurrency the profile asks for at any point.
    pub fn peak(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start, usize::max)
    }

    /// The index of the active stage and the time spent in it, or `None` once every stage has
    /// elapsed.
    pub fn position(&self, elapsed: Duration) -> Option<(usize, Duration)> {
        let mut stage_start = Duration::ZERO;
        for (index, stage) in self.stages.iter().enumerate() {
            if elapsed < stage_start + stage.duration {
                return Some((index, elapsed - stage_start));
            }
            stage_start += stage.duration;
        }

        None
    }

    /// Desired number of workers at `elapsed` into the run, rounded to the nearest whole worker.
    ///
    /// After the last stage the final target is held.
    pub fn desired_concurrency(&self, elapsed: Duration) -> usize {
        let mut previous_target = self.start;
        let mut stage_start = Duration::ZERO;
        for stage in &self.stages {
            if elapsed < stage_start + stage.duration {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let diff = stage.target as f64 - previous_target as f64;
                return (previous_target as f64 + diff * progress).round() as usize;
            }
            stage_start += stage.duration;
            previous_target = stage.target;
        }

        previous_target
    }
}
