//! Graceful shutdown signal handling.
//!
//! [`SigDown`] listens for SIGTERM and SIGINT and cancels a shared token, which the HTTP
//! server awaits to stop accepting connections and drain in-flight requests.

use std::future::Future;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Registers the signal handlers. Fails if the runtime cannot install them.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let cancel = token.clone();
        task_tracker.spawn(async move {
            let received = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = received, "Shutting down");
            cancel.cancel();
        });
        task_tracker.close();
        Ok(Self {
            task_tracker,
            cancellation_token: token,
        })
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Resolves once a shutdown signal arrived, suitable for `with_graceful_shutdown`.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.cancellation_token.clone();
        async move { token.cancelled().await }
    }

    /// Waits for the signal and for the listener task to finish.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
        self.task_tracker.wait().await;
    }
}
