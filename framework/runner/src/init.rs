use clap::Parser;

use crate::cli::LoadTunnelScenarioCli;

/// Initialise the CLI and logging for the load tunnel runner.
pub fn init() -> LoadTunnelScenarioCli {
    env_logger::init();

    LoadTunnelScenarioCli::parse()
}
