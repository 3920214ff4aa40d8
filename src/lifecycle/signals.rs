//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGTERM/SIGINT and turn them into a shutdown
//! - Turn SIGHUP into a route reload
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - SIGHUP triggers a route re-sync, not a shutdown

use tokio::sync::mpsc;

/// Resolve on the first SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("SIGINT received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}

/// Forward every SIGHUP to `reload_tx` until the receiver goes away.
#[cfg(unix)]
pub fn spawn_reload_listener(reload_tx: mpsc::UnboundedSender<()>) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(hangup) => hangup,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGHUP, reload disabled");
                return;
            }
        };
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading routes");
            if reload_tx.send(()).is_err() {
                break;
            }
        }
    });
}

#[cfg(not(unix))]
pub fn spawn_reload_listener(_reload_tx: mpsc::UnboundedSender<()>) {}
