use tokio_util::sync::CancellationToken;

/// Whether SIGINT/SIGTERM can be observed on this platform.
pub const fn supports_signals() -> bool {
    cfg!(unix)
}

/// Cancels `stop` when the process is asked to shut down.
///
/// Returns `false` when only Ctrl-C can be observed, so callers can tell the
/// operator that SIGTERM will not stop the worker gracefully.
pub fn install_shutdown_handler(stop: CancellationToken) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        let mut interrupt = signal(SignalKind::interrupt())?;

        tokio::spawn(async move {
            tokio::select! {
                _ = terminate.recv() => log::debug!("Received SIGTERM"),
                _ = interrupt.recv() => log::debug!("Received SIGINT"),
            }
            stop.cancel();
        });

        Ok(true)
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.cancel();
            }
        });

        Ok(false)
    }
}
