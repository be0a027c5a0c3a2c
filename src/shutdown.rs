use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Installs SIGTERM and SIGINT handlers.
///
/// Returns a token that is cancelled when either signal arrives. Must be
/// called from within a tokio runtime.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => log::info!("SIGTERM received, shutting down..."),
            _ = sigint.recv() => log::info!("SIGINT received, shutting down..."),
        }
        trigger.cancel();
    });

    Ok(token)
}

/// Waits out the startup delay before any dependency is contacted.
///
/// Returns false if the token was cancelled during the wait.
pub async fn wait_startup_delay(delay: Duration, token: &CancellationToken) -> bool {
    if delay.is_zero() {
        return true;
    }

    log::info!(
        "Sleeping {}s before contacting dependencies",
        delay.as_secs_f64()
    );
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
