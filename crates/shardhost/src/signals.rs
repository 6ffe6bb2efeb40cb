//! Signal handling for graceful shutdown.
//!
//! The host runs until the operating system asks it to stop, then drains the
//! container before exiting.

use std::fmt;
use tokio::signal;

/// The signal that ended the host, reported back to the caller so the
/// shutdown log names it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
        }
    }
}

/// Waits until the process is asked to terminate.
///
/// # Platform Support
///
/// * **Unix platforms**: SIGINT and SIGTERM
/// * **Other platforms**: Ctrl+C only, reported as [`ShutdownSignal::Interrupt`]
///
/// # Returns
///
/// The signal that arrived, or an error if the signal listeners could not be
/// installed.
///
/// # Example
///
/// ```rust
/// let signal = wait_for_shutdown_signal().await?;
/// info!("📡 Received {}, shutting down", signal);
/// container.shutdown().await;
/// ```
pub async fn wait_for_shutdown_signal() -> anyhow::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        let received = tokio::select! {
            _ = sigint.recv() => ShutdownSignal::Interrupt,
            _ = sigterm.recv() => ShutdownSignal::Terminate,
        };
        Ok(received)
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        Ok(ShutdownSignal::Interrupt)
    }
}
