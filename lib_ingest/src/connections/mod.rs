//! # Connections Module
//!
//! This module handles persistent connections to external services:
//! the Redis coordination store and the PostgreSQL sink database.

/// Module for PostgreSQL database connection pooling and management.
pub mod db_postgres;

/// Module for the namespaced Redis connection shared by locks and queues.
pub mod cache_redis;

pub use cache_redis::{connection_info, namespaced_key, CacheConnection, CacheError};
pub use db_postgres::{Database, DbError};
