/// Signal handling for graceful shutdown.
///
/// First SIGINT or SIGTERM: stop scheduling ticks, let the current one finish.
/// A second signal exits immediately.
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct SignalHandler;

impl SignalHandler {
    /// Listen for shutdown signals and cancel `cancel` on the first one.
    pub fn install(cancel: CancellationToken) -> std::io::Result<JoinHandle<()>> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        Ok(tokio::spawn(async move {
            tokio::select! {
                _ = sigint.recv() => tracing::info!("SIGINT received, finishing current tick"),
                _ = sigterm.recv() => tracing::info!("SIGTERM received, finishing current tick"),
            }
            cancel.cancel();

            tokio::select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }
            tracing::warn!("second signal received, exiting immediately");
            std::process::exit(130);
        }))
    }
}
