use std::future::Future;
use std::time::Duration;

use load_tunnel_core::prelude::DelegatedShutdownListener;

#[derive(Debug)]
pub struct Executor {
    runtime: tokio::runtime::Runtime,
}

impl Executor {
    pub(crate) fn new(runtime: tokio::runtime::Runtime) -> Self {
        Self { runtime }
    }

    /// Run async code in place, blocking the calling worker until it completes.
    ///
    /// The future is not cancelled when the run shuts down. Requests that are in flight when the
    /// run starts draining complete, or time out, and are still recorded.
    pub fn execute_in_place<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        self.runtime.block_on(fut)
    }

    /// Sleep for `duration`, waking early if the shutdown signal arrives. Returns true on shutdown.
    pub(crate) fn sleep_or_shutdown(
        &self,
        duration: Duration,
        shutdown_listener: &mut DelegatedShutdownListener,
    ) -> bool {
        self.runtime.block_on(async {
            tokio::select! {
                _ = tokio::time::sleep(duration) => false,
                _ = shutdown_listener.wait_for_shutdown() => true,
            }
        })
    }
}
