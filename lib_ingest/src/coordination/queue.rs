//! # Work Queue
//!
//! FIFO queues of item references with a separate keyed payload store, both on the
//! Redis coordination store.
//!
//! ## Key layout
//! - `{namespace}:{queue}:pending` - list of references, oldest at the head.
//! - `{namespace}:{queue}:data:{reference}` - JSON payload of one reference.
//!
//! Dequeue claims a reference (`LPOP` is atomic, so concurrent consumers never see
//! the same one) but leaves the payload in place. The consumer fetches the payload
//! afterwards and deletes it once it has been applied. A consumer that dies between
//! the two leaves an orphaned payload behind; nothing redelivers it automatically.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::store::{CoordinationStore, RequeueOutcome};
use crate::connections::{CacheConnection, CacheError};

/// Suffix of the pending list of `queue`, before namespacing.
pub fn pending_suffix(queue: &str) -> String {
    format!("{}:pending", queue)
}

/// Suffix of the payload key of `reference` in `queue`, before namespacing.
pub fn data_suffix(queue: &str, reference: &str) -> String {
    format!("{}:data:{}", queue, reference)
}

/// The consumer side of a work queue, as the ingest daemon uses it.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Number of references waiting in `queue`.
    async fn get_queue_size(&self, queue: &str) -> Result<usize, CacheError>;

    /// Claims the oldest reference of `queue`, or `None` when it is empty.
    async fn dequeue(&self, queue: &str) -> Result<Option<String>, CacheError>;

    /// Payload stored for `reference`, or `None` when there is none.
    async fn get_data(&self, queue: &str, reference: &str) -> Result<Option<Value>, CacheError>;

    /// Removes the payload of `reference`. Returns whether anything was deleted;
    /// deleting an absent payload is not an error.
    async fn delete_data(&self, queue: &str, reference: &str) -> Result<bool, CacheError>;
}

/// Work queue broker over a coordination store (Redis by default).
#[derive(Debug, Clone)]
pub struct QueueBroker<S = CacheConnection> {
    store: S,
}

impl<S: CoordinationStore> QueueBroker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Liveness of the underlying store.
    pub async fn ping(&self) -> Result<bool, CacheError> {
        self.store.ping().await
    }

    fn pending_key(&self, queue: &str) -> String {
        self.store.build_key(&pending_suffix(queue))
    }

    fn data_key(&self, queue: &str, reference: &str) -> String {
        self.store.build_key(&data_suffix(queue, reference))
    }

    /// Stores `payload` and appends `reference` to the tail of `queue`.
    ///
    /// Both writes go out in one `MULTI/EXEC` pipeline so a payload never exists
    /// without its reference or the other way round. Returns the queue length
    /// after the push.
    pub async fn enqueue(
        &self,
        queue: &str,
        reference: &str,
        payload: &Value,
    ) -> Result<usize, CacheError> {
        self.push(queue, reference, payload, None).await
    }

    /// Like [`QueueBroker::enqueue`], with the payload expiring after `ttl_secs`.
    pub async fn enqueue_with_ttl(
        &self,
        queue: &str,
        reference: &str,
        payload: &Value,
        ttl_secs: u64,
    ) -> Result<usize, CacheError> {
        self.push(queue, reference, payload, Some(ttl_secs.max(1))).await
    }

    async fn push(
        &self,
        queue: &str,
        reference: &str,
        payload: &Value,
        ttl_secs: Option<u64>,
    ) -> Result<usize, CacheError> {
        let encoded = serde_json::to_string(payload)?;
        let result = self
            .store
            .store_and_push(
                &self.data_key(queue, reference),
                &encoded,
                ttl_secs,
                &self.pending_key(queue),
                reference,
            )
            .await;

        match result {
            Ok(length) => {
                debug!("Enqueued {} to {} (queue size: {})", reference, queue, length);
                Ok(length)
            }
            Err(e) => {
                error!("Error enqueueing {} to {}: {}", reference, queue, e);
                Err(e)
            }
        }
    }

    /// Looks at up to `limit` references from the head of `queue` without removing them.
    pub async fn peek_queue(&self, queue: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let items = self
            .store
            .range(&self.pending_key(queue), limit)
            .await
            .inspect_err(|e| error!("Error peeking queue {}: {}", queue, e))?;
        debug!("Peeked {} items from {}", items.len(), queue);
        Ok(items)
    }

    /// Pushes `reference` back onto the tail of `queue` if its payload still exists
    /// and the reference is not already waiting in `queue`.
    ///
    /// Administrative recovery for payloads orphaned by a failed or crashed
    /// consumer. The check and the push are one server-side step, so a consumer
    /// working on the same queue can never see the reference twice.
    pub async fn requeue(&self, queue: &str, reference: &str) -> Result<RequeueOutcome, CacheError> {
        let outcome = self
            .store
            .push_if_orphaned(
                &self.data_key(queue, reference),
                &self.pending_key(queue),
                reference,
            )
            .await
            .inspect_err(|e| error!("Error requeueing {} to {}: {}", reference, queue, e))?;

        match outcome {
            RequeueOutcome::Requeued(length) => {
                debug!("Requeued {} to {} (queue size: {})", reference, queue, length)
            }
            RequeueOutcome::AlreadyPending => {
                warn!("Not requeueing {} on {}: already pending", reference, queue)
            }
            RequeueOutcome::PayloadMissing => {
                warn!("Not requeueing {} on {}: payload is gone", reference, queue)
            }
        }
        Ok(outcome)
    }
}

#[async_trait]
impl<S: CoordinationStore> WorkQueue for QueueBroker<S> {
    async fn get_queue_size(&self, queue: &str) -> Result<usize, CacheError> {
        let size = self
            .store
            .list_len(&self.pending_key(queue))
            .await
            .inspect_err(|e| error!("Error getting queue size for {}: {}", queue, e))?;
        debug!("Queue {} size: {}", queue, size);
        Ok(size)
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<String>, CacheError> {
        let reference = self
            .store
            .pop_front(&self.pending_key(queue))
            .await
            .inspect_err(|e| error!("Error dequeuing from {}: {}", queue, e))?;
        if let Some(reference) = &reference {
            debug!("Dequeued {} from {}", reference, queue);
        }
        Ok(reference)
    }

    async fn get_data(&self, queue: &str, reference: &str) -> Result<Option<Value>, CacheError> {
        let raw = self
            .store
            .get(&self.data_key(queue, reference))
            .await
            .inspect_err(|e| error!("Error getting data for {}: {}", reference, e))?;

        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)?;
                debug!("Retrieved data for {}", reference);
                Ok(Some(value))
            }
            None => {
                warn!("No data found for {}", reference);
                Ok(None)
            }
        }
    }

    async fn delete_data(&self, queue: &str, reference: &str) -> Result<bool, CacheError> {
        let deleted = self
            .store
            .delete(&self.data_key(queue, reference))
            .await
            .inspect_err(|e| error!("Error deleting data for {}: {}", reference, e))?;
        if deleted {
            debug!("Deleted data for {}", reference);
        } else {
            debug!("No data to delete for {}", reference);
        }
        Ok(deleted)
    }
}
