//! # lib_ingest
//!
//! Redis-backed coordination (distributed locks, FIFO work queues) and the ingest
//! daemon that drains the queues into the PostgreSQL sinks.
//!
//! Modules are gated by folder-level features; `full` (the default) enables all.

#[cfg(feature = "configs")]
pub mod configs;

#[cfg(feature = "connections")]
pub mod connections;

#[cfg(feature = "coordination")]
pub mod coordination;

#[cfg(feature = "daemon")]
pub mod daemon;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "sinks")]
pub mod sinks;

#[cfg(feature = "configs")]
pub use configs::*;
#[cfg(feature = "connections")]
pub use connections::{CacheConnection, CacheError, Database, DbError};
#[cfg(feature = "coordination")]
pub use coordination::{
    CoordinationStore, LockClient, LockToken, QueueBroker, RequeueOutcome, WorkQueue,
};
#[cfg(feature = "daemon")]
pub use daemon::{DaemonError, DaemonState, IngestDaemon, Lifecycle};
#[cfg(feature = "loggers")]
pub use loggers::init_logging;
#[cfg(feature = "metrics")]
pub use metrics::{MetricsSink, NoopMetrics, TracingMetrics};
