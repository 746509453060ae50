//! In-memory doubles for daemon tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::connections::{CacheError, DbError};
use crate::coordination::WorkQueue;
use crate::sinks::{BadTickerSink, FundamentalsRecord, FundamentalsSink, SinkError};

#[derive(Default)]
struct QueueState {
    pending: HashMap<String, VecDeque<String>>,
    data: HashMap<(String, String), Value>,
    size_calls: HashMap<String, usize>,
    dequeue_calls: HashMap<String, usize>,
    broken_queues: HashSet<String>,
    corrupt_refs: HashSet<String>,
}

/// A [`WorkQueue`] over hash maps, with call counters and injectable failures.
#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<QueueState>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, queue: &str, reference: &str, payload: Value) {
        let mut state = self.state.lock().unwrap();
        state
            .data
            .insert((queue.to_string(), reference.to_string()), payload);
        state
            .pending
            .entry(queue.to_string())
            .or_default()
            .push_back(reference.to_string());
    }

    /// Queues a reference whose payload was never stored (or already expired).
    pub fn push_reference_only(&self, queue: &str, reference: &str) {
        self.state
            .lock()
            .unwrap()
            .pending
            .entry(queue.to_string())
            .or_default()
            .push_back(reference.to_string());
    }

    /// Makes size and dequeue calls on `queue` fail like an unreachable store.
    pub fn break_queue(&self, queue: &str) {
        self.state
            .lock()
            .unwrap()
            .broken_queues
            .insert(queue.to_string());
    }

    /// Makes `get_data` for `reference` fail as if the stored bytes were not JSON.
    pub fn corrupt(&self, reference: &str) {
        self.state
            .lock()
            .unwrap()
            .corrupt_refs
            .insert(reference.to_string());
    }

    pub fn has_data(&self, queue: &str, reference: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .data
            .contains_key(&(queue.to_string(), reference.to_string()))
    }

    pub fn pending(&self, queue: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .pending
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn size_calls(&self, queue: &str) -> usize {
        *self.state.lock().unwrap().size_calls.get(queue).unwrap_or(&0)
    }

    pub fn dequeue_calls(&self, queue: &str) -> usize {
        *self.state.lock().unwrap().dequeue_calls.get(queue).unwrap_or(&0)
    }
}

fn unreachable_store() -> CacheError {
    CacheError::Timeout(Duration::from_secs(1))
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn get_queue_size(&self, queue: &str) -> Result<usize, CacheError> {
        let mut state = self.state.lock().unwrap();
        *state.size_calls.entry(queue.to_string()).or_default() += 1;
        if state.broken_queues.contains(queue) {
            return Err(unreachable_store());
        }
        Ok(state.pending.get(queue).map_or(0, VecDeque::len))
    }

    async fn dequeue(&self, queue: &str) -> Result<Option<String>, CacheError> {
        let mut state = self.state.lock().unwrap();
        *state.dequeue_calls.entry(queue.to_string()).or_default() += 1;
        if state.broken_queues.contains(queue) {
            return Err(unreachable_store());
        }
        Ok(state.pending.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn get_data(&self, queue: &str, reference: &str) -> Result<Option<Value>, CacheError> {
        let state = self.state.lock().unwrap();
        if state.corrupt_refs.contains(reference) {
            let err = serde_json::from_str::<Value>("{not json").unwrap_err();
            return Err(CacheError::Serialization(err));
        }
        Ok(state
            .data
            .get(&(queue.to_string(), reference.to_string()))
            .cloned())
    }

    async fn delete_data(&self, queue: &str, reference: &str) -> Result<bool, CacheError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .data
            .remove(&(queue.to_string(), reference.to_string()))
            .is_some())
    }
}

/// Records every bad ticker it is given; can be told to fail writes or close.
#[derive(Default)]
pub struct RecordingBadTickerSink {
    calls: Mutex<Vec<(String, DateTime<Utc>, String)>>,
    failing_tickers: Mutex<HashSet<String>>,
    fail_close: bool,
    closes: Mutex<usize>,
}

impl RecordingBadTickerSink {
    pub fn failing_close() -> Self {
        Self {
            fail_close: true,
            ..Self::default()
        }
    }

    pub fn fail_ticker(&self, ticker: &str) {
        self.failing_tickers.lock().unwrap().insert(ticker.to_string());
    }

    pub fn calls(&self) -> Vec<(String, DateTime<Utc>, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn tickers(&self) -> Vec<String> {
        self.calls().into_iter().map(|(t, _, _)| t).collect()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

#[async_trait]
impl BadTickerSink for RecordingBadTickerSink {
    async fn log_bad_ticker(
        &self,
        ticker: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SinkError> {
        if self.failing_tickers.lock().unwrap().contains(ticker) {
            return Err(SinkError::Database(DbError::QueryError(format!(
                "insert of {} rejected",
                ticker
            ))));
        }
        self.calls
            .lock()
            .unwrap()
            .push((ticker.to_string(), timestamp, reason.to_string()));
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        *self.closes.lock().unwrap() += 1;
        if self.fail_close {
            return Err(SinkError::Database(DbError::ConnectionError(
                "connection reset".to_string(),
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingFundamentalsSink {
    records: Mutex<Vec<FundamentalsRecord>>,
    closes: Mutex<usize>,
}

impl RecordingFundamentalsSink {
    pub fn records(&self) -> Vec<FundamentalsRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

#[async_trait]
impl FundamentalsSink for RecordingFundamentalsSink {
    async fn upsert_fundamentals(&self, record: &FundamentalsRecord) -> Result<(), SinkError> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// Collects formatted log output of the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Routes this thread's tracing events into the capture until the guard drops.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
