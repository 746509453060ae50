//! An in-process [`CoordinationStore`] with Redis semantics for the primitives it
//! implements. Leases follow the tokio clock, so paused-time tests can expire them.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::store::{CoordinationStore, RequeueOutcome};
use crate::connections::CacheError;

enum Entry {
    Text {
        value: String,
        expires_at: Option<Instant>,
    },
    List(VecDeque<String>),
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn purge_expired(&mut self, key: &str) {
        let expired = matches!(
            self.entries.get(key),
            Some(Entry::Text { expires_at: Some(at), .. }) if *at <= Instant::now()
        );
        if expired {
            self.entries.remove(key);
        }
    }

    fn text(&mut self, key: &str) -> Option<&str> {
        self.purge_expired(key);
        match self.entries.get(key) {
            Some(Entry::Text { value, .. }) => Some(value.as_str()),
            _ => None,
        }
    }

    fn contains(&mut self, key: &str) -> bool {
        self.purge_expired(key);
        self.entries.contains_key(key)
    }

    fn list_mut(&mut self, key: &str) -> &mut VecDeque<String> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::List(VecDeque::new()));
        if !matches!(entry, Entry::List(_)) {
            *entry = Entry::List(VecDeque::new());
        }
        match entry {
            Entry::List(list) => list,
            Entry::Text { .. } => unreachable!("entry was just made a list"),
        }
    }

    fn list(&self, key: &str) -> Option<&VecDeque<String>> {
        match self.entries.get(key) {
            Some(Entry::List(list)) => Some(list),
            _ => None,
        }
    }

    /// Empty lists disappear, as in Redis.
    fn drop_if_empty(&mut self, key: &str) {
        if self.list(key).is_some_and(VecDeque::is_empty) {
            self.entries.remove(key);
        }
    }
}

/// Keys live in a map shared by every store cloned with [`MemoryStore::with_namespace`].
#[derive(Clone)]
pub struct MemoryStore {
    namespace: String,
    keys: Arc<Mutex<Keyspace>>,
    down: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            keys: Arc::default(),
            down: Arc::default(),
        }
    }

    /// Another handle on the same keys under a different namespace.
    pub fn with_namespace(&self, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            ..self.clone()
        }
    }

    /// While down, every call fails like a store that stopped answering.
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Full keys currently present, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.keys.lock().unwrap().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Keyspace>, CacheError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(CacheError::Timeout(Duration::from_secs(1)));
        }
        Ok(self.keys.lock().unwrap())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn ping(&self) -> Result<bool, CacheError> {
        self.lock().map(|_| true)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl_secs: u64,
    ) -> Result<bool, CacheError> {
        let mut keys = self.lock()?;
        if keys.contains(key) {
            return Ok(false);
        }
        keys.entries.insert(
            key.to_string(),
            Entry::Text {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut keys = self.lock()?;
        if keys.text(key) != Some(expected) {
            return Ok(false);
        }
        keys.entries.remove(key);
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lock()?.text(key).map(str::to_string))
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut keys = self.lock()?;
        let existed = keys.contains(key);
        keys.entries.remove(key);
        Ok(existed)
    }

    async fn store_and_push(
        &self,
        data_key: &str,
        payload: &str,
        ttl_secs: Option<u64>,
        list_key: &str,
        member: &str,
    ) -> Result<usize, CacheError> {
        let mut keys = self.lock()?;
        keys.entries.insert(
            data_key.to_string(),
            Entry::Text {
                value: payload.to_string(),
                expires_at: ttl_secs.map(|ttl| Instant::now() + Duration::from_secs(ttl)),
            },
        );
        let list = keys.list_mut(list_key);
        list.push_back(member.to_string());
        Ok(list.len())
    }

    async fn list_len(&self, key: &str) -> Result<usize, CacheError> {
        Ok(self.lock()?.list(key).map_or(0, VecDeque::len))
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut keys = self.lock()?;
        if keys.list(key).is_none() {
            return Ok(None);
        }
        let head = keys.list_mut(key).pop_front();
        keys.drop_if_empty(key);
        Ok(head)
    }

    async fn range(&self, key: &str, limit: usize) -> Result<Vec<String>, CacheError> {
        let keys = self.lock()?;
        Ok(keys
            .list(key)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn push_if_orphaned(
        &self,
        data_key: &str,
        list_key: &str,
        member: &str,
    ) -> Result<RequeueOutcome, CacheError> {
        let mut keys = self.lock()?;
        if !keys.contains(data_key) {
            return Ok(RequeueOutcome::PayloadMissing);
        }
        if keys.list(list_key).is_some_and(|list| list.iter().any(|m| m == member)) {
            return Ok(RequeueOutcome::AlreadyPending);
        }
        let list = keys.list_mut(list_key);
        list.push_back(member.to_string());
        Ok(RequeueOutcome::Requeued(list.len()))
    }
}
