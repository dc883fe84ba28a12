use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Exit code used when a second interrupt arrives before shutdown completes.
pub const FORCED_EXIT_CODE: i32 = 130;

/// Install interrupt handlers that cancel `token`.
///
/// The first SIGINT or SIGTERM requests a graceful stop of the running
/// transcoder. A second one exits the process immediately.
#[cfg(unix)]
pub fn install_cancel_handler(token: CancellationToken) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;
    use tracing::{info, warn};

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            if token.is_cancelled() {
                warn!("Received signal {} again, exiting immediately", sig);
                std::process::exit(FORCED_EXIT_CODE);
            }
            info!("Received signal {}, stopping", sig);
            token.cancel();
        }
    });

    Ok(())
}

/// Install a Ctrl-C handler that cancels `token`. Must be called from within
/// a tokio runtime.
#[cfg(windows)]
pub fn install_cancel_handler(token: CancellationToken) -> Result<()> {
    use tracing::{info, warn};

    tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Unable to listen for Ctrl-C: {}", e);
                return;
            }
            if token.is_cancelled() {
                warn!("Received Ctrl-C again, exiting immediately");
                std::process::exit(FORCED_EXIT_CODE);
            }
            info!("Received Ctrl-C, stopping");
            token.cancel();
        }
    });

    Ok(())
}
