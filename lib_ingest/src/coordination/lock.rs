//! # Distributed Lock
//!
//! Non-reentrant, time-bounded locks on the Redis coordination store.
//!
//! * **Acquire** is a single `SET key token NX EX ttl`: it only succeeds when the key
//!   is absent, and the lease bounds how long a crashed holder can block others.
//! * **Release** deletes the key only when it still holds the caller's token, in one
//!   server-side step, so a holder whose lease expired and was reassigned cannot
//!   delete the new holder's lock.
//!
//! Contention is not an error: a contended acquire is `Ok(None)`, a release with a
//! stale or foreign token is `Ok(false)`. Only transport failures are `Err`.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use super::store::CoordinationStore;
use crate::connections::{CacheConnection, CacheError};
use crate::metrics::MetricsSink;

/// Key suffix of the lock called `name`, before namespacing.
pub fn lock_suffix(name: &str) -> String {
    format!("lock:{}", name)
}

/// Proof of lock ownership handed out by [`LockClient::acquire`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LockToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Distributed lock client over a coordination store (Redis by default).
pub struct LockClient<S = CacheConnection> {
    store: S,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<S: CoordinationStore> LockClient<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Reports acquire/release counters to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Full store key of the lock called `name`.
    pub fn lock_key(&self, name: &str) -> String {
        self.store.build_key(&lock_suffix(name))
    }

    /// Attempts to take the lock on `name` for `ttl_secs` seconds.
    ///
    /// Returns the token to present at release time, or `None` when someone else
    /// holds the lock. A TTL of zero is raised to one second.
    pub async fn acquire(&self, name: &str, ttl_secs: u64) -> Result<Option<LockToken>, CacheError> {
        let key = self.lock_key(name);
        let token = LockToken::generate();
        let ttl = ttl_secs.max(1);

        match self.store.set_if_absent(&key, token.as_str(), ttl).await {
            Ok(false) => {
                debug!("Lock {} is held by another owner", key);
                self.count("lock.acquire.contended", name);
                Ok(None)
            }
            Ok(true) => {
                debug!("Acquired lock {} with token {} (ttl {}s)", key, token, ttl);
                self.count("lock.acquire.success", name);
                Ok(Some(token))
            }
            Err(e) => {
                error!("Failed to acquire lock {}: {}", key, e);
                self.count("lock.acquire.error", name);
                Err(e)
            }
        }
    }

    /// Releases the lock on `name` if `token` is the current holder's token.
    ///
    /// Returns `true` when the key was deleted. `false` means the lease already
    /// expired, the lock was released before, or another owner holds it; in all of
    /// those cases the stored lock is left untouched.
    pub async fn release(&self, name: &str, token: &str) -> Result<bool, CacheError> {
        let key = self.lock_key(name);

        match self.store.delete_if_equals(&key, token).await {
            Ok(true) => {
                debug!("Released lock {} with token {}", key, token);
                self.count("lock.release.success", name);
                Ok(true)
            }
            Ok(false) => {
                warn!("Did not release lock {}; token mismatch or missing key", key);
                self.count("lock.release.noop", name);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to release lock {}: {}", key, e);
                self.count("lock.release.error", name);
                Err(e)
            }
        }
    }

    /// Token of the current holder of `name`, if any. Observability only.
    pub async fn holder(&self, name: &str) -> Result<Option<String>, CacheError> {
        self.store.get(&self.lock_key(name)).await
    }

    fn count(&self, metric: &str, lock: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.incr(
                metric,
                &[("namespace", self.store.namespace()), ("lock", lock)],
            );
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for LockClient<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockClient")
            .field("store", &self.store)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}
