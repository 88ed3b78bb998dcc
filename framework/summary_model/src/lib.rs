use itertools::Itertools;
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::collections::HashMap;
use std::io::{BufRead, Read, Write};
use std::path::Path;

/// One stage of the ramp profile the run was configured with.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSummary {
    /// Stage length in milliseconds
    pub duration_ms: u64,
    /// Worker count reached at the end of the stage
    pub target: usize,
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    /// The unique run id
    ///
    /// Chosen by the runner unless one is passed on the command line.
    pub run_id: String,
    /// The name of the scenario that was run
    pub scenario_name: String,
    /// The time the run started
    ///
    /// This is a Unix timestamp in seconds.
    pub started_at: i64,
    /// The length of the run window, in seconds
    ///
    /// This is the ramp profile's total duration, or the `--duration` override if that is shorter.
    pub run_duration: u64,
    /// The configured ramp profile
    pub stages: Vec<StageSummary>,
    /// The largest number of workers that ran at once
    pub peak_concurrency: usize,
    /// The total number of iterations completed by all workers
    pub iterations: u64,
    /// The threshold expressions the run was graded against, such as `http_req_duration: p(95)<500`
    pub thresholds: Vec<String>,
    /// `PASS` or `FAIL`, not set if the run was aborted before grading
    pub verdict: Option<String>,
    /// Human readable description of each violated threshold
    pub violations: Vec<String>,
    /// Environment variables set for the run
    ///
    /// This won't capture all environment variables. Just the ones that the scenario asks for.
    /// Secrets such as signing keys must never be captured.
    pub env: HashMap<String, String>,
    /// The version of Load Tunnel that was used for this run
    pub load_tunnel_version: String,
}

impl RunSummary {
    /// Create a new run summary
    pub fn new(
        run_id: String,
        scenario_name: String,
        started_at: i64,
        run_duration: u64,
        stages: Vec<StageSummary>,
        thresholds: Vec<String>,
        load_tunnel_version: String,
    ) -> Self {
        Self {
            run_id,
            scenario_name,
            started_at,
            run_duration,
            stages,
            peak_concurrency: 0,
            iterations: 0,
            thresholds,
            verdict: None,
            violations: Vec::new(),
            env: HashMap::with_capacity(0),
            load_tunnel_version,
        }
    }

    pub fn set_peak_concurrency(&mut self, peak_concurrency: usize) {
        self.peak_concurrency = peak_concurrency;
    }

    pub fn set_iterations(&mut self, iterations: u64) {
        self.iterations = iterations;
    }

    /// Record the verdict and the violations that caused it
    pub fn set_verdict(&mut self, passed: bool, violations: Vec<String>) {
        self.verdict = Some(if passed { "PASS" } else { "FAIL" }.to_string());
        self.violations = violations;
    }

    /// Add an environment variable
    pub fn add_env(&mut self, key: String, value: String) {
        self.env.insert(key, value);
    }

    /// Compute a fingerprint for this run summary
    ///
    /// The fingerprint is intended to uniquely identify the configuration used to run the scenario,
    /// so that runs of the same configuration can be compared. It uses the
    ///     - Scenario name
    ///     - Run duration
    ///     - Ramp stages
    ///     - Thresholds
    ///     - Selected environment variables
    ///     - Load Tunnel version
    ///
    /// The fingerprint is computed using [sha3::Sha3_256].
    pub fn fingerprint(&self) -> String {
        let mut hasher = sha3::Sha3_256::new();
        Digest::update(&mut hasher, self.scenario_name.as_bytes());
        Digest::update(&mut hasher, self.run_duration.to_le_bytes());
        for stage in &self.stages {
            Digest::update(&mut hasher, stage.duration_ms.to_le_bytes());
            Digest::update(&mut hasher, (stage.target as u64).to_le_bytes());
        }
        self.thresholds
            .iter()
            .sorted()
            .for_each(|t| Digest::update(&mut hasher, t.as_bytes()));
        self.env
            .iter()
            .sorted_by_key(|(k, _)| k.to_owned())
            .for_each(|(k, v)| {
                Digest::update(&mut hasher, k.as_bytes());
                Digest::update(&mut hasher, v.as_bytes());
            });
        Digest::update(&mut hasher, self.load_tunnel_version.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

/// Append the run summary to a file
///
/// The summary will be serialized to JSON and output as a single line followed by a newline. The
/// recommended file extension is `.jsonl`.
pub fn append_run_summary(run_summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)?;
    store_run_summary(run_summary, &mut file)?;
    file.write_all(b"\n")?;
    Ok(())
}

/// Serialize the run summary to a writer
pub fn store_run_summary<W: Write>(run_summary: &RunSummary, writer: &mut W) -> anyhow::Result<()> {
    serde_json::to_writer(writer, run_summary)?;
    Ok(())
}

/// Load a run summary from a reader
pub fn load_run_summary<R: Read>(reader: R) -> anyhow::Result<RunSummary> {
    let reader = std::io::BufReader::new(reader);
    let run_summary: RunSummary = serde_json::from_reader(reader)?;
    Ok(run_summary)
}

/// Load run summaries from a file
///
/// The file should contain one JSON object per line. This is the format produced by
/// [append_run_summary].
pub fn load_summary_runs(path: &Path) -> anyhow::Result<Vec<RunSummary>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut runs = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let run: RunSummary = serde_json::from_str(&line)?;
        runs.push(run);
    }
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn summary(run_id: &str) -> RunSummary {
        RunSummary::new(
            run_id.to_string(),
            "mixed_scenario".to_string(),
            1_700_000_000,
            600,
            vec![
                StageSummary {
                    duration_ms: 30_000,
                    target: 50,
                },
                StageSummary {
                    duration_ms: 120_000,
                    target: 150,
                },
            ],
            vec!["http_req_duration: p(95)<500".to_string()],
            "0.1.0".to_string(),
        )
    }

    #[test]
    fn test_should_append_and_load_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");

        let mut first = summary("first");
        first.set_peak_concurrency(150);
        first.set_iterations(4200);
        first.set_verdict(true, vec![]);
        let mut second = summary("second");
        second.set_verdict(
            false,
            vec!["errors: rate<0.01 observed 0.05 (off by 0.04)".to_string()],
        );

        append_run_summary(&first, &path).unwrap();
        append_run_summary(&second, &path).unwrap();

        let runs = load_summary_runs(&path).unwrap();
        assert_eq!(vec![first, second], runs);
    }

    #[test]
    fn test_should_load_single_summary() {
        let mut buffer = Vec::new();
        store_run_summary(&summary("single"), &mut buffer).unwrap();

        let loaded = load_run_summary(buffer.as_slice()).unwrap();

        assert_eq!(summary("single"), loaded);
    }

    #[test]
    fn test_should_fingerprint_configuration_not_run() {
        let mut first = summary("first");
        first.add_env("MERCHANT_ID".to_string(), "1".to_string());
        first.add_env("CHANNEL_ID".to_string(), "1".to_string());
        let mut second = summary("second");
        second.add_env("CHANNEL_ID".to_string(), "1".to_string());
        second.add_env("MERCHANT_ID".to_string(), "1".to_string());
        second.set_peak_concurrency(12);

        assert_eq!(first.fingerprint(), second.fingerprint());
    }

    #[test]
    fn test_should_change_fingerprint_with_stages() {
        let first = summary("first");
        let mut second = summary("second");
        second.stages[1].target = 250;

        assert_ne!(first.fingerprint(), second.fingerprint());
    }
}
