//! # Lifecycle
//!
//! Shared run state of the daemon: `Init -> Running -> Stopping -> Stopped`.
//! Clones observe and drive the same state, so the signal listener and the poll
//! loop each hold one.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Init,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DaemonState::Init => "init",
            DaemonState::Running => "running",
            DaemonState::Stopping => "stopping",
            DaemonState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: Arc<Mutex<DaemonState>>,
    shutdown: CancellationToken,
    done: CancellationToken,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(DaemonState::Init)),
            shutdown: CancellationToken::new(),
            done: CancellationToken::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DaemonState> {
        // The state is a plain enum; a poisoned guard still holds a valid value.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> DaemonState {
        *self.lock()
    }

    /// The `running` flag of the poll loop.
    pub fn is_running(&self) -> bool {
        self.state() == DaemonState::Running
    }

    /// Moves `Init -> Running`. Returns `false` if a stop was requested first.
    pub fn mark_running(&self) -> bool {
        let mut state = self.lock();
        match *state {
            DaemonState::Init | DaemonState::Running => {
                *state = DaemonState::Running;
                true
            }
            DaemonState::Stopping | DaemonState::Stopped => false,
        }
    }

    /// Asks the daemon to stop after the item in flight.
    ///
    /// `reason` is logged, normally the name of the signal received (`SIGTERM`).
    pub fn request_stop(&self, reason: &str) {
        info!("Received {}, initiating graceful shutdown...", reason);
        {
            let mut state = self.lock();
            if matches!(*state, DaemonState::Init | DaemonState::Running) {
                *state = DaemonState::Stopping;
            }
        }
        self.shutdown.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await
    }

    /// Resolves once the daemon has stopped and closed its sinks.
    pub async fn finished(&self) {
        self.done.cancelled().await
    }

    pub fn mark_stopped(&self) {
        *self.lock() = DaemonState::Stopped;
        self.shutdown.cancel();
        self.done.cancel();
    }
}
