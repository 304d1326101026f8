//! Process-wide interruption signal

use tokio_util::sync::CancellationToken;

/// Install one SIGINT/SIGTERM listener for the whole process.
///
/// Returns a token that is cancelled when the first signal arrives. Hand
/// clones of it to every [`Worker`](crate::Worker) and
/// [`PanicGroup`](crate::PanicGroup) that should report interruption.
/// Must be called from within a Tokio runtime.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        if wait_for_signal().await {
            token_clone.cancel();
        }
    });

    token
}

#[cfg(unix)]
async fn wait_for_signal() -> bool {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!(error = %e, "Failed to install signal handlers");
            return false;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
    true
}

#[cfg(not(unix))]
async fn wait_for_signal() -> bool {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            false
        }
    }
}
