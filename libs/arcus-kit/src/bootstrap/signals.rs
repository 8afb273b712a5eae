use anyhow::Result;
use std::fmt;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Signals that stop a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    #[cfg(unix)]
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => f.write_str("SIGINT"),
            #[cfg(unix)]
            Self::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// # Errors
/// Returns an error if a signal handler cannot be installed.
pub async fn wait_for_shutdown() -> Result<ShutdownSignal> {
    tokio::select! {
        result = signal::ctrl_c() => {
            result?;
            Ok(ShutdownSignal::Interrupt)
        }
        result = wait_terminate() => result,
    }
}

/// Hook OS signals to `cancel`.
///
/// The listener only flips the token; whoever supervises the runtime observes it and owns the
/// unload sequence.
pub fn spawn_signal_listener(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown() => match result {
                Ok(sig) => tracing::info!(signal = %sig, "Shutdown signal received"),
                Err(e) => {
                    tracing::warn!(error = %e, "Signal handler failed, falling back to ctrl_c()");
                    let _ = signal::ctrl_c().await;
                }
            },
            () = cancel.cancelled() => return,
        }
        cancel.cancel();
    })
}

#[cfg(unix)]
async fn wait_terminate() -> Result<ShutdownSignal> {
    let mut handler = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    handler.recv().await;
    Ok(ShutdownSignal::Terminate)
}

#[cfg(not(unix))]
async fn wait_terminate() -> Result<ShutdownSignal> {
    std::future::pending::<Result<ShutdownSignal>>().await
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listener_exits_when_token_is_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let handle = spawn_signal_listener(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
