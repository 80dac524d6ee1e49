//! Process-wide cooperative shutdown flag.
//!
//! The flag is set from a signal-listening task and only ever read by the
//! processing loops at their checkpoints. Nothing else runs in the signal task.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Cloneable handle to the process shutdown flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// `false` once shutdown has been requested.
    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Request shutdown. Idempotent.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Spawn a task that sets the flag when a termination signal arrives.
    ///
    /// Must be called from within a Tokio runtime.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let mut quit = signal(SignalKind::quit())?;
        let mut hangup = signal(SignalKind::hangup())?;
        let mut user1 = signal(SignalKind::user_defined1())?;
        let mut user2 = signal(SignalKind::user_defined2())?;

        let shutdown = self.clone();
        tokio::spawn(async move {
            let name = tokio::select! {
                _ = interrupt.recv() => "SIGINT",
                _ = terminate.recv() => "SIGTERM",
                _ = quit.recv() => "SIGQUIT",
                _ = hangup.recv() => "SIGHUP",
                _ = user1.recv() => "SIGUSR1",
                _ = user2.recv() => "SIGUSR2",
            };
            info!(signal = name, "Received shutdown signal");
            shutdown.request();
        });

        Ok(())
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        let shutdown = self.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!(signal = "ctrl_c", "Received shutdown signal"),
                Err(e) => tracing::warn!(error = %e, "Failed to listen for Ctrl+C"),
            }
            shutdown.request();
        });

        Ok(())
    }
}
