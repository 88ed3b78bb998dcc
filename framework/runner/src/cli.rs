use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(about, long_about = None)]
pub struct LoadTunnelScenarioCli {
    /// Base URL of the order service to test
    ///
    /// Scenarios provide their own default, so this is only needed when testing a different host.
    #[clap(short, long, env = "BASE_URL")]
    pub connection_string: Option<String>,

    /// Stop the run after this many seconds, even if the ramp profile has stages left
    #[clap(long)]
    pub duration: Option<u64>,

    /// Do not show a progress bar on the CLI.
    ///
    /// This is recommended for CI/CD environments where the progress bar isn't being looked at by anyone and is just adding noise to the logs.
    #[clap(long, default_value = "false")]
    pub no_progress: bool,

    /// Run ID, generated if not provided
    #[clap(long)]
    pub run_id: Option<String>,

    /// Append a one line summary of this run to the given file
    #[clap(long)]
    pub run_summary_path: Option<PathBuf>,

    /// Write the full structured report to the given file
    #[clap(long)]
    pub json_summary_path: Option<PathBuf>,
}
