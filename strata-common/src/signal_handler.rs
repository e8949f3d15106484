//! Turns OS shutdown signals into cancellation of long running store work.

use std::fmt::{Display, Formatter};
use std::future::Future;

use anyhow::Result;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The signal which asked the process to stop.
pub enum ShutdownSignal {
    Quit,
    Interrupt,
    Terminate,
}

impl Display for ShutdownSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Quit => "SIGQUIT",
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

/// Resolves with the first shutdown signal received.
///
/// The handlers are installed before this returns, so a signal sent after
/// the call is never missed even if the future is polled later.
pub fn wait_shutdown_signal() -> Result<impl Future<Output = ShutdownSignal>> {
    let mut quit = signal(SignalKind::quit())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(async move {
        tokio::select! {
            _ = quit.recv() => ShutdownSignal::Quit,
            _ = interrupt.recv() => ShutdownSignal::Interrupt,
            _ = terminate.recv() => ShutdownSignal::Terminate,
        }
    })
}

#[must_use = "the token is only cancelled while the guard is alive"]
/// Cancels a token when a shutdown signal arrives, for as long as it lives.
pub struct ShutdownGuard {
    watcher: JoinHandle<()>,
}

impl ShutdownGuard {
    /// Installs the signal handlers and starts watching on behalf of `work`.
    ///
    /// `work` only names the guarded operation in the log.
    pub fn install(work: &'static str, token: CancellationToken) -> Result<Self> {
        let shutdown = wait_shutdown_signal()?;
        let watcher = tokio::spawn(async move {
            let received = shutdown.await;
            warn!(target: "strata::shutdown", signal = %received, work, "Shutdown requested, cancelling");
            token.cancel();
        });
        Ok(Self { watcher })
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_leaves_token_alone_without_signal() {
        let token = CancellationToken::new();
        let guard = ShutdownGuard::install("test", token.clone()).unwrap();
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());

        drop(guard);
        tokio::task::yield_now().await;
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_signal_names() {
        assert_eq!(ShutdownSignal::Interrupt.to_string(), "SIGINT");
        assert_eq!(ShutdownSignal::Terminate.to_string(), "SIGTERM");
    }
}
