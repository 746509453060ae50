//! # Coordination Module
//!
//! Distributed locks and work queues shared by producers and the ingest daemon.

pub mod lock;
#[cfg(test)]
pub(crate) mod memory;
pub mod queue;
pub mod store;

pub use lock::{LockClient, LockToken};
pub use queue::{QueueBroker, WorkQueue};
pub use store::{CoordinationStore, RequeueOutcome};
