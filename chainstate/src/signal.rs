//! Graceful shutdown.
//!
//! [`SigDown`] turns SIGTERM/SIGINT (Ctrl+C on Windows) into a cancelled
//! [`CancellationToken`]. Axum stops accepting connections on it, and the
//! streaming executor ends every open listing with an error item. Producer
//! tasks run on the [`TaskTracker`] handed out by [`SigDown::tracker`], so
//! [`SigDown::drain`] can wait for them before the process exits.

use std::time::Duration;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// What ended the serving phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
    Terminate,
    Interrupt,
    /// The token was cancelled from inside the process.
    Requested,
}

/// Signal listener plus the tracker of tasks shutdown waits for.
#[derive(Debug)]
pub struct SigDown {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers and spawns the listener.
    ///
    /// # Errors
    ///
    /// Returns an [`std::io::Error`] if a handler cannot be registered.
    #[allow(clippy::unnecessary_wraps)]
    pub fn try_new() -> Result<Self, std::io::Error> {
        let token = CancellationToken::new();
        let tracker = TaskTracker::new();

        #[cfg(unix)]
        let received = {
            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let token = token.clone();
            async move {
                tokio::select! {
                    _ = sigterm.recv() => Shutdown::Terminate,
                    _ = sigint.recv() => Shutdown::Interrupt,
                    () = token.cancelled() => Shutdown::Requested,
                }
            }
        };
        #[cfg(windows)]
        let received = {
            let token = token.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => Shutdown::Interrupt,
                    () = token.cancelled() => Shutdown::Requested,
                }
            }
        };

        let listener_token = token.clone();
        tracker.spawn(async move {
            let reason = received.await;
            tracing::info!(?reason, "shutting down");
            listener_token.cancel();
        });

        Ok(Self { tracker, token })
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker for tasks that must finish before the process exits.
    #[must_use]
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Waits for shutdown, then up to `grace` for tracked tasks.
    ///
    /// Returns `false` if tasks were still running when `grace` ran out.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.token.cancelled().await;
        self.tracker.close();
        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            tracing::warn!(
                pending = self.tracker.len(),
                "tasks still running after shutdown grace period"
            );
        }
        drained
    }
}
