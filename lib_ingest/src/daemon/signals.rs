//! # Signal Handling
//!
//! The first SIGINT or SIGTERM asks the daemon to stop after the item in flight.
//! Another one while it is still stopping (a sink call that hangs, say) exits the
//! process at once. The listener lives until the daemon reports it has stopped.

use std::io;

use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Lifecycle;

/// What to do about a signal, given the shutdown already under way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: a graceful stop was requested.
    Stop,
    /// A stop was already requested: the caller should exit immediately.
    ForceExit,
}

/// Requests a graceful stop, or reports that the shutdown should be forced.
pub fn on_signal(lifecycle: &Lifecycle, name: &str) -> SignalAction {
    if lifecycle.is_stop_requested() {
        error!("Received {} again during shutdown, exiting immediately", name);
        SignalAction::ForceExit
    } else {
        lifecycle.request_stop(name);
        SignalAction::Stop
    }
}

/// Exit status of a process ended by `signo`, as shells report it.
fn exit_code(signo: i32) -> i32 {
    128 + signo
}

/// Installs SIGINT and SIGTERM handlers that drive `lifecycle`.
///
/// The handlers are registered before this returns, so a signal delivered right
/// afterwards is never missed. The listener task ends once the lifecycle is
/// marked stopped.
#[cfg(unix)]
pub fn install_signal_handlers(lifecycle: Lifecycle) -> io::Result<JoinHandle<()>> {
    use signal::unix::{signal as unix_signal, SignalKind};

    const SIGINT: i32 = 2;
    const SIGTERM: i32 = 15;

    let mut interrupt = unix_signal(SignalKind::interrupt())?;
    let mut terminate = unix_signal(SignalKind::terminate())?;
    debug!("Signal handlers installed for SIGINT and SIGTERM");

    Ok(tokio::spawn(async move {
        loop {
            let (name, signo) = tokio::select! {
                Some(()) = interrupt.recv() => ("SIGINT", SIGINT),
                Some(()) = terminate.recv() => ("SIGTERM", SIGTERM),
                _ = lifecycle.finished() => break,
            };
            if on_signal(&lifecycle, name) == SignalAction::ForceExit {
                std::process::exit(exit_code(signo));
            }
        }
        debug!("Signal listener finished");
    }))
}

/// Non-unix targets only get Ctrl-C.
#[cfg(not(unix))]
pub fn install_signal_handlers(lifecycle: Lifecycle) -> io::Result<JoinHandle<()>> {
    debug!("Signal handler installed for Ctrl-C");
    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Ctrl-C handler failed: {}", e);
                        break;
                    }
                    if on_signal(&lifecycle, "SIGINT") == SignalAction::ForceExit {
                        std::process::exit(exit_code(2));
                    }
                }
                _ = lifecycle.finished() => break,
            }
        }
    }))
}
