//! Signal handling for interruptible commands
//!
//! A fetch runs as a future raced against Ctrl+C and SIGTERM. When a signal
//! wins, the fetch future is dropped; the partial-file guard of any transfer
//! in flight removes its temporary file on drop.

use std::future::Future;

use tokio::signal;
use tracing::{info, warn};

use crate::errors::{AppError, Result};

/// Wait for Ctrl+C or SIGTERM and name the signal received
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Ctrl+C signal received");
            "Ctrl+C"
        },
        _ = terminate => {
            info!("SIGTERM signal received");
            "SIGTERM"
        },
    }
}

/// Run `task` until it completes or a shutdown signal arrives
pub async fn run_until_signal<T>(task: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        result = task => result,
        signal = shutdown_signal() => {
            eprintln!("\n🛑 {signal} received - cancelling");
            Err(AppError::Interrupted { signal })
        },
    }
}
