//! Ctrl+C / SIGTERM handling.
//!
//! The first signal cancels the returned token so the executor stops issuing
//! new transfers and the run can still report. A second signal exits at once.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

/// Exit status used for an interrupted run.
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

pub fn install_signal_handler() -> io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let count = Arc::new(AtomicU32::new(0));

    #[cfg(unix)]
    let mut sigterm = {
        use tokio::signal::unix::{SignalKind, signal};
        signal(SignalKind::terminate())?
    };

    let handler_token = token.clone();
    tokio::spawn(async move {
        loop {
            #[cfg(unix)]
            {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }

            #[cfg(not(unix))]
            if tokio::signal::ctrl_c().await.is_err() {
                tracing::warn!("could not listen for Ctrl+C");
                return;
            }

            if count.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::warn!("interrupt received, finishing in-flight transfers");
                tracing::warn!("press Ctrl+C again to exit immediately");
                handler_token.cancel();
            } else {
                tracing::warn!("forced exit");
                std::process::exit(i32::from(INTERRUPTED_EXIT_CODE));
            }
        }
    });

    Ok(token)
}
