//! # Configuration Modules
//!
//! Settings for the Redis coordination store, the PostgreSQL sinks and the ingest
//! daemon. Every struct is a `clap::Args` group so binaries can flatten them into
//! their own parser; each field also falls back to an environment variable.

/// Provides system-level configuration: connection settings and the daemon route table.
pub mod config_sys;

pub use config_sys::*;
