//! Process-wide shutdown signal
//!
//! One `CancellationToken` is shared by every loop in the process; SIGINT or
//! SIGTERM cancels it.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

async fn terminate() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    std::future::pending::<()>().await;
}

/// Resolve once the process is asked to stop
pub async fn wait_for_signal() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Received SIGINT");
        }
        _ = terminate() => info!("Received SIGTERM"),
    }
}

/// Cancel `shutdown` when a stop signal arrives
pub fn spawn_signal_handler(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                info!("Shutting down");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    })
}
