//! Graceful shutdown on SIGTERM and SIGINT.

use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;

/// Listens for shutdown signals and cancels a token when one arrives.
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    /// Register the signal handlers. Returns an error if registration
    /// fails.
    pub fn install() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let notifier = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
                _ = sigint.recv() => tracing::info!("received SIGINT, shutting down"),
            }
            notifier.cancel();
        });
        Ok(Shutdown { token })
    }

    /// A token that resolves when a shutdown signal has been received.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}
