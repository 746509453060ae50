//! # Redis Connection Layer
//!
//! Owns the managed connection to the coordination store and the key namespace.
//! Data-structure commands live in `coordination::store`, which the lock and the
//! queue are built on; this layer only connects,
//! namespaces keys, bounds every command with a timeout and answers liveness probes.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{
    Client, ConnectionAddr, ConnectionInfo, IntoConnectionInfo, RedisConnectionInfo, RedisResult,
};
use thiserror::Error;
use tracing::{debug, error};

use crate::configs::RedisConfig;

/// Custom error types for coordination store operations.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to connect to redis: {0}")]
    ConnectionError(String),
    #[error("Redis command failed: {0}")]
    CommandError(#[from] redis::RedisError),
    #[error("Redis command timed out after {0:?}")]
    Timeout(Duration),
    #[error("Stored payload is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Joins a namespace and a key suffix as `"{namespace}:{suffix}"`.
pub fn namespaced_key(namespace: &str, suffix: &str) -> String {
    format!("{}:{}", namespace, suffix)
}

/// Connection parameters for `config`.
///
/// The password is handed to the client as-is rather than through a URL, so it may
/// contain any character.
pub fn connection_info(config: &RedisConfig) -> Result<ConnectionInfo, CacheError> {
    let mut redis_settings = RedisConnectionInfo::default().set_db(config.db);
    if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
        redis_settings = redis_settings.set_password(password);
    }
    let info = ConnectionAddr::Tcp(config.host.clone(), config.port)
        .into_connection_info()
        .map_err(|e| CacheError::ConnectionError(e.to_string()))?;
    Ok(info.set_redis_settings(redis_settings))
}

/// A namespaced handle on the Redis coordination store.
///
/// Cloning is cheap: clones share the same managed (multiplexed, auto-reconnecting)
/// connection, which is how every primitive in one process shares the store.
#[derive(Clone)]
pub struct CacheConnection {
    manager: ConnectionManager,
    namespace: String,
    command_timeout: Duration,
}

impl CacheConnection {
    /// Connects to Redis and verifies the connection with `PING`.
    ///
    /// Nothing is returned unless the store answered, so callers never hold a
    /// half-initialised handle.
    ///
    /// # Arguments
    /// * `config` - Host, port, database and timeouts.
    /// * `namespace` - Prefix applied to every key built through this handle.
    pub async fn connect(
        config: &RedisConfig,
        namespace: impl Into<String>,
    ) -> Result<Self, CacheError> {
        let namespace = namespace.into();
        let client = Client::open(connection_info(config)?)
            .map_err(|e| CacheError::ConnectionError(e.to_string()))?;

        let manager =
            match tokio::time::timeout(config.connect_timeout(), client.get_connection_manager())
                .await
            {
                Ok(Ok(manager)) => manager,
                Ok(Err(e)) => {
                    error!("Failed to connect to {}: {}", config, e);
                    return Err(CacheError::ConnectionError(e.to_string()));
                }
                Err(_) => {
                    error!("Timed out connecting to {}", config);
                    return Err(CacheError::ConnectionError(format!(
                        "timed out after {:?} connecting to {}",
                        config.connect_timeout(),
                        config
                    )));
                }
            };

        let connection = Self {
            manager,
            namespace,
            command_timeout: config.socket_timeout(),
        };

        match connection.ping().await {
            Ok(true) => {}
            Ok(false) => {
                return Err(CacheError::ConnectionError(format!(
                    "{} answered PING with an unexpected reply",
                    config
                )))
            }
            Err(e) => return Err(CacheError::ConnectionError(e.to_string())),
        }

        debug!(
            "Redis connection established for namespace: {} ({})",
            connection.namespace, config
        );
        Ok(connection)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Builds `"{namespace}:{suffix}"`. Pure, no I/O.
    pub fn build_key(&self, suffix: &str) -> String {
        namespaced_key(&self.namespace, suffix)
    }

    /// Sends `PING` and reports whether the store answered `PONG`.
    ///
    /// Errors are returned to the caller, who decides whether they are fatal.
    pub async fn ping(&self) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let reply: String = self.run(redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(reply.eq_ignore_ascii_case("PONG"))
    }

    /// A handle on the shared connection for issuing commands.
    pub(crate) fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Awaits a store round trip, bounded by the configured socket timeout.
    pub(crate) async fn run<T, F>(&self, command: F) -> Result<T, CacheError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.command_timeout, command).await {
            Ok(result) => result.map_err(CacheError::from),
            Err(_) => Err(CacheError::Timeout(self.command_timeout)),
        }
    }
}

impl fmt::Debug for CacheConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConnection")
            .field("namespace", &self.namespace)
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}
