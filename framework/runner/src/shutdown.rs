use tokio::signal;

use load_tunnel_core::prelude::ShutdownHandle;

pub(crate) fn start_shutdown_listener(
    runtime: &tokio::runtime::Runtime,
) -> anyhow::Result<ShutdownHandle> {
    let handle = ShutdownHandle::default();

    let listener_handle = handle.clone();
    runtime.spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C, the run can only end on its own: {e:?}");
            return;
        }
        listener_handle.shutdown();
        println!("Received shutdown signal, draining workers...");
    });

    Ok(handle)
}
