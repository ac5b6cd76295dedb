use super::log_sink::LogSink;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Shutdown flag shared between the signal listener and the daemon loop.
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Spawns a task that raises the shutdown flag on SIGINT or SIGTERM.
pub fn listen_for_signals(
    shutdown_tx: watch::Sender<bool>,
    log: Arc<LogSink>,
) -> io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        log.info(format!(
            "Received {name}, initiating graceful shutdown..."
        ));
        let _ = shutdown_tx.send(true);
    }))
}

/// Sleeps for `period` unless shutdown is requested first. Returns whether
/// shutdown was requested.
pub async fn wait_or_shutdown(period: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    let requested = tokio::select! {
        _ = tokio::time::sleep(period) => return false,
        requested = shutdown.wait_for(|stop| *stop) => requested.is_ok(),
    };
    if !requested {
        // nobody can request shutdown any more, just wait out the period
        tokio::time::sleep(period).await;
    }
    requested
}
