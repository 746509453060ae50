//! # Daemon Module
//!
//! The long-running ingest daemon: polls the configured queues, applies each payload
//! to its sink and shuts down cleanly on SIGINT/SIGTERM.

use std::io;

use thiserror::Error;

use crate::configs::ConfigError;
use crate::connections::{CacheError, DbError};

pub mod ingest;
pub mod lifecycle;
pub mod routes;
pub mod signals;

#[cfg(test)]
pub(crate) mod testing;

pub use ingest::{CycleReport, IngestDaemon, QueueReport};
pub use lifecycle::{DaemonState, Lifecycle};
pub use routes::{
    connect_handler, BadTickerHandler, FundamentalsHandler, ItemHandler, Route, RouteRegistry,
};
pub use signals::{install_signal_handlers, on_signal, SignalAction};

/// Failures while building the daemon. Once it runs, nothing is fatal.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordination store unavailable: {0}")]
    Cache(#[from] CacheError),

    #[error("Sink database unavailable: {0}")]
    Database(#[from] DbError),

    #[error("Failed to install signal handlers: {0}")]
    Signal(#[from] io::Error),
}
