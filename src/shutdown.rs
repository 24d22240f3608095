use std::io;

use cfg_if::cfg_if;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() -> io::Result<()> {
            let mut ctrl_c = ctrl_c()?;
            let mut ctrl_close = ctrl_close()?;
            let mut ctrl_shutdown = ctrl_shutdown()?;
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
            Ok(())
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn raw_shutdown_signal() -> io::Result<()> {
            let mut interrupt = signal(SignalKind::interrupt())?;
            let mut terminate = signal(SignalKind::terminate())?;
            let mut hangup = signal(SignalKind::hangup())?;
            select! {
                _ = interrupt.recv() => (),
                _ = terminate.recv() => (),
                _ = hangup.recv() => (),
            }
            Ok(())
        }
    } else {
        compile_error!("Shutdown signals are not supported on this target");
    }
}

/// Cancels `token` on the first OS shutdown signal.
///
/// Must be called from within a tokio runtime.
pub(crate) fn cancel_on_os_signal(token: CancellationToken) {
    tokio::spawn(async move {
        select! {
            res = raw_shutdown_signal() => match res {
                Ok(()) => {
                    info!("Shutdown signal detected. Attempting graceful shutdown...");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Could not listen to OS shutdown signals"),
            },
            // Shut down by other means, stop listening
            _ = token.cancelled() => (),
        }
    });
}
