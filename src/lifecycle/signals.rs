//! OS signal handling.
//!
//! - SIGINT / SIGTERM → graceful shutdown
//! - SIGHUP → config reload (same channel as the file watcher)

use tokio::sync::mpsc;

/// Resolves on the first Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

/// Forward SIGHUP to `reload_tx` until the receiver goes away.
#[cfg(unix)]
pub fn forward_sighup(reload_tx: mpsc::Sender<()>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup())?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            tracing::info!("Received SIGHUP, triggering reload");
            // Full means a reload is already pending.
            if let Err(mpsc::error::TrySendError::Closed(())) = reload_tx.try_send(()) {
                break;
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
pub fn forward_sighup(_reload_tx: mpsc::Sender<()>) -> std::io::Result<()> {
    Ok(())
}
