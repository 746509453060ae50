//! Shared helpers for the live integration tests.
//!
//! Tests that need a server are `#[ignore]`d, so a plain `cargo test` reports them
//! as skipped. Run them with `cargo test -- --ignored` after pointing them at a
//! server:
//! - Redis: `REDIS_TEST_HOST` (and optionally `REDIS_TEST_PORT`, `REDIS_TEST_DB`,
//!   `REDIS_TEST_PASSWORD`),
//! - PostgreSQL: `DATABASE_TEST_URL`.
//!
//! A live test that runs without its variable panics instead of passing vacuously.

use std::sync::{Arc, Mutex};

use lib_ingest::configs::{PostgresConfig, RedisConfig};
use lib_ingest::metrics::MetricsSink;
use lib_ingest::CacheConnection;
use uuid::Uuid;

fn required_env(var: &str) -> String {
    match std::env::var(var) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => panic!("{var} must be set to run live tests (cargo test -- --ignored)"),
    }
}

/// Redis settings for live tests, from `REDIS_TEST_*`.
pub fn redis_test_config() -> RedisConfig {
    let host = required_env("REDIS_TEST_HOST");
    let port = std::env::var("REDIS_TEST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(6379);
    let db = std::env::var("REDIS_TEST_DB")
        .ok()
        .and_then(|d| d.parse().ok())
        .unwrap_or(15);
    RedisConfig {
        host,
        port,
        db,
        password: std::env::var("REDIS_TEST_PASSWORD").ok(),
        socket_timeout_secs: 5,
        connect_timeout_secs: 5,
    }
}

/// PostgreSQL settings for live tests, from `DATABASE_TEST_URL`.
pub fn postgres_test_config() -> PostgresConfig {
    PostgresConfig::new(required_env("DATABASE_TEST_URL"))
}

/// A namespace no other test run shares.
pub fn unique_namespace(prefix: &str) -> String {
    format!("test:{}:{}", prefix, Uuid::new_v4().simple())
}

/// A ticker symbol no other test run shares.
pub fn unique_ticker(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Connects to the test server under a fresh namespace.
pub async fn connect_test_cache(prefix: &str) -> CacheConnection {
    let config = redis_test_config();
    CacheConnection::connect(&config, unique_namespace(prefix))
        .await
        .expect("REDIS_TEST_HOST is set but the server is unreachable")
}

/// A [`MetricsSink`] that remembers every counter name with its tags.
#[derive(Default, Clone)]
pub struct RecordingMetrics {
    events: Arc<Mutex<Vec<(String, Vec<(String, String)>)>>>,
}

impl RecordingMetrics {
    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn events(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.events.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr(&self, name: &str, tags: &[(&str, &str)]) {
        let tags = tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.events.lock().unwrap().push((name.to_string(), tags));
    }
}
