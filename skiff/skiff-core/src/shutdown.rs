//! Process shutdown on SIGTERM / SIGINT.
//!
//! Every long-running task of a Skiff process observes a child of one root
//! [`CancellationToken`]; a termination signal cancels that root.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Wait for SIGTERM or SIGINT (Ctrl+C).
pub async fn wait_for_signal() {
    let sigint = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        _ = sigterm => {
            info!("Received SIGTERM signal");
        }
        _ = sigint => {
            info!("Received SIGINT signal (Ctrl+C)");
        }
    }
}

/// Cancel `root` once a termination signal arrives.
pub fn cancel_on_signal(root: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_signal() => {
                info!("Shutting down");
                root.cancel();
            }
            _ = root.cancelled() => {}
        }
    });
}
