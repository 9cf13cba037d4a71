/// Fixed-interval scheduler around [`Watchdog::run_tick`].
///
/// Runs one tick immediately, then one per interval. Each tick runs in its own
/// task so an error or panic inside it is logged and the loop carries on.
use crate::status::{DaemonState, StatusTracker};
use crate::watchdog::Watchdog;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Handle to a running watchdog loop.
pub struct Daemon {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Daemon {
    /// Spawn the scheduling loop on the current runtime.
    pub fn start(watchdog: Arc<Watchdog>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let status = StatusTracker::new(watchdog.data_dir().status());
        let task = tokio::spawn(run_loop(watchdog, interval, cancel.clone(), status));
        Self { cancel, task }
    }

    /// Stop scheduling ticks. Idempotent; an in-flight tick still completes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Token that stops the loop when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop and wait for the in-flight tick, if any, to finish.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "watchdog loop ended abnormally");
        }
    }
}

async fn run_loop(
    watchdog: Arc<Watchdog>,
    interval: Duration,
    cancel: CancellationToken,
    mut status: StatusTracker,
) {
    status.update(DaemonState::Starting);
    tracing::info!(
        interval_ms = interval.as_millis() as u64,
        root = %watchdog.root().display(),
        data_dir = %watchdog.data_dir().root().display(),
        "watchdog started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }

        status.update(DaemonState::Ticking);
        let tick_watchdog = watchdog.clone();
        match tokio::spawn(async move { tick_watchdog.run_tick().await }).await {
            Ok(Ok(summary)) => status.record_tick(summary),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "tick failed");
                status.record_error(e.to_string());
            }
            Err(e) => {
                tracing::warn!(error = %e, "tick aborted");
                status.record_error(e.to_string());
            }
        }
        status.update(DaemonState::Idle);
    }

    status.update(DaemonState::ShuttingDown);
    tracing::info!("watchdog stopped");
    status.remove();
}
