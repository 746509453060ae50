//! # Coordination Store
//!
//! The handful of store primitives the lock and the queue are built from. Each one is
//! a single round trip (a command, a `MULTI/EXEC` pipeline or a Lua script), so every
//! primitive is atomic on the server.
//!
//! [`CacheConnection`] is the Redis implementation. Keys passed in are already
//! namespaced with [`CoordinationStore::build_key`].

use std::sync::LazyLock;

use async_trait::async_trait;
use redis::{Script, Value};

use crate::connections::{namespaced_key, CacheConnection, CacheError};

/// Deletes `KEYS[1]` only when its value equals `ARGV[1]`. Returns 1 on delete, 0 otherwise.
const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Appends `ARGV[1]` to list `KEYS[2]` when payload `KEYS[1]` exists and the list does
/// not already hold it. Returns -1 without a payload, 0 when already listed, otherwise
/// the new list length.
const REQUEUE_SCRIPT: &str = r#"
if redis.call("exists", KEYS[1]) == 0 then
    return -1
end
if redis.call("lpos", KEYS[2], ARGV[1]) then
    return 0
end
return redis.call("rpush", KEYS[2], ARGV[1])
"#;

static UNLOCK: LazyLock<Script> = LazyLock::new(|| Script::new(UNLOCK_SCRIPT));
static REQUEUE: LazyLock<Script> = LazyLock::new(|| Script::new(REQUEUE_SCRIPT));

/// What [`CoordinationStore::push_if_orphaned`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueOutcome {
    /// Pushed; carries the list length afterwards.
    Requeued(usize),
    /// The reference is still waiting in the list; nothing was pushed.
    AlreadyPending,
    /// There is no payload to deliver; nothing was pushed.
    PayloadMissing,
}

impl RequeueOutcome {
    fn from_script_reply(reply: i64) -> Self {
        match reply {
            r if r < 0 => Self::PayloadMissing,
            0 => Self::AlreadyPending,
            length => Self::Requeued(usize::try_from(length).unwrap_or(usize::MAX)),
        }
    }

    pub fn is_requeued(&self) -> bool {
        matches!(self, Self::Requeued(_))
    }
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Prefix of every key built through this store.
    fn namespace(&self) -> &str;

    /// `"{namespace}:{suffix}"`.
    fn build_key(&self, suffix: &str) -> String {
        namespaced_key(self.namespace(), suffix)
    }

    async fn ping(&self) -> Result<bool, CacheError>;

    /// Sets `key` to `value` with a lease of `ttl_secs`, only if `key` is absent.
    async fn set_if_absent(&self, key: &str, value: &str, ttl_secs: u64)
        -> Result<bool, CacheError>;

    /// Deletes `key` only while it holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Deletes `key`; `false` when it did not exist.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Stores `payload` under `data_key` and appends `member` to `list_key`, both or
    /// neither. Returns the list length afterwards.
    async fn store_and_push(
        &self,
        data_key: &str,
        payload: &str,
        ttl_secs: Option<u64>,
        list_key: &str,
        member: &str,
    ) -> Result<usize, CacheError>;

    async fn list_len(&self, key: &str) -> Result<usize, CacheError>;

    /// Removes and returns the head of `key`.
    async fn pop_front(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Up to `limit` members from the head of `key`, left in place.
    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError>;

    /// Appends `member` to `list_key` if `data_key` exists and `member` is not listed yet.
    async fn push_if_orphaned(
        &self,
        data_key: &str,
        list_key: &str,
        member: &str,
    ) -> Result<RequeueOutcome, CacheError>;
}

#[async_trait]
impl CoordinationStore for CacheConnection {
    fn namespace(&self) -> &str {
        CacheConnection::namespace(self)
    }

    fn build_key(&self, suffix: &str) -> String {
        CacheConnection::build_key(self, suffix)
    }

    async fn ping(&self) -> Result<bool, CacheError> {
        CacheConnection::ping(self).await
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let reply: Value = self
            .run(
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl_secs)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let deleted: i64 = self
            .run(UNLOCK.key(key).arg(expected).invoke_async(&mut conn))
            .await?;
        Ok(deleted > 0)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection();
        self.run(redis::cmd("GET").arg(key).query_async(&mut conn))
            .await
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection();
        let deleted: i64 = self
            .run(redis::cmd("DEL").arg(key).query_async(&mut conn))
            .await?;
        Ok(deleted > 0)
    }

    async fn store_and_push(
        &self,
        data_key: &str,
        payload: &str,
        ttl_secs: Option<u64>,
        list_key: &str,
        member: &str,
    ) -> Result<usize, CacheError> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        match ttl_secs {
            Some(ttl) => pipe.cmd("SET").arg(data_key).arg(payload).arg("EX").arg(ttl).ignore(),
            None => pipe.cmd("SET").arg(data_key).arg(payload).ignore(),
        };
        pipe.cmd("RPUSH").arg(list_key).arg(member);

        let mut conn = self.connection();
        let (length,): (usize,) = self.run(pipe.query_async(&mut conn)).await?;
        Ok(length)
    }

    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        let mut conn = self.connection();
        self.run(redis::cmd("LLEN").arg(key).query_async(&mut conn))
            .await
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.connection();
        self.run(redis::cmd("LPOP").arg(key).query_async(&mut conn))
            .await
    }

    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = i64::try_from(limit).unwrap_or(i64::MAX) - 1;
        let mut conn = self.connection();
        self.run(redis::cmd("LRANGE").arg(key).arg(0).arg(stop).query_async(&mut conn))
            .await
    }

    async fn push_if_orphaned(
        &self,
        data_key: &str,
        list_key: &str,
        member: &str,
    ) -> Result<RequeueOutcome, CacheError> {
        let mut conn = self.connection();
        let reply: i64 = self
            .run(
                REQUEUE
                    .key(data_key)
                    .key(list_key)
                    .arg(member)
                    .invoke_async(&mut conn),
            )
            .await?;
        Ok(RequeueOutcome::from_script_reply(reply))
    }
}
