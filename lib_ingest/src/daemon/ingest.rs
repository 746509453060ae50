//! # Ingest Daemon
//!
//! One cooperative poll loop. Each cycle visits the routes in registration order,
//! skips empty queues, and drains the others one item at a time:
//!
//! 1. `dequeue` claims a reference,
//! 2. `get_data` fetches its payload,
//! 3. the route's handler applies it to the sink,
//! 4. `delete_data` removes the payload.
//!
//! Delivery is at most once. A payload whose sink write failed stays in the store
//! after its reference was consumed and is only picked up again by a manual requeue.
//! A payload that can never be applied is deleted.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::routes::{connect_handler, Route, RouteRegistry};
use super::{install_signal_handlers, DaemonError, Lifecycle};
use crate::configs::{DaemonConfig, PostgresConfig, RedisConfig};
use crate::connections::CacheConnection;
use crate::coordination::{QueueBroker, WorkQueue};

/// Item counts of one queue in one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueReport {
    pub queue: String,
    pub processed: usize,
    pub failed: usize,
}

impl QueueReport {
    fn new(queue: &str) -> Self {
        Self {
            queue: queue.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub queues: Vec<QueueReport>,
}

impl CycleReport {
    pub fn processed(&self) -> usize {
        self.queues.iter().map(|q| q.processed).sum()
    }

    pub fn failed(&self) -> usize {
        self.queues.iter().map(|q| q.failed).sum()
    }

    pub fn queue(&self, name: &str) -> Option<&QueueReport> {
        self.queues.iter().find(|q| q.queue == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Processed,
    Failed,
}

pub struct IngestDaemon {
    queue: Arc<dyn WorkQueue>,
    registry: RouteRegistry,
    lifecycle: Lifecycle,
    poll_interval: Duration,
    signal_task: Option<JoinHandle<()>>,
}

impl IngestDaemon {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        registry: RouteRegistry,
        lifecycle: Lifecycle,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            registry,
            lifecycle,
            poll_interval,
            signal_task: None,
        }
    }

    /// Connects the queue broker and every sink in the route table, then installs
    /// the signal handlers.
    ///
    /// Any failure here is fatal; sinks connected before the failure are closed
    /// again before the error is returned.
    pub async fn bootstrap(
        redis: &RedisConfig,
        postgres: &PostgresConfig,
        config: &DaemonConfig,
    ) -> Result<Self, DaemonError> {
        let routes = config.validated_routes()?;

        let cache = CacheConnection::connect(redis, config.namespace.clone()).await?;
        info!("Connected to coordination store {} (namespace: {})", redis, config.namespace);
        let queue: Arc<dyn WorkQueue> = Arc::new(QueueBroker::new(cache));

        let mut registry = RouteRegistry::new();
        for route in routes {
            let handler = match connect_handler(route.sink, postgres).await {
                Ok(handler) => handler,
                Err(e) => {
                    error!("Failed to connect {} sink for queue {}: {}", route.sink, route.queue, e);
                    close_all(&registry).await;
                    return Err(e.into());
                }
            };
            debug!("Route registered: {}", route);
            registry.register(route.queue.clone(), handler)?;
        }

        let daemon = Self::new(queue, registry, Lifecycle::new(), config.poll_interval());
        Ok(daemon.with_signal_handlers()?)
    }

    /// Lets SIGINT and SIGTERM stop this daemon.
    pub fn with_signal_handlers(mut self) -> std::io::Result<Self> {
        self.signal_task = Some(install_signal_handlers(self.lifecycle.clone())?);
        Ok(self)
    }

    /// A handle on the daemon's run state, e.g. to stop it from another task.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn routes(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Polls until a stop is requested, then closes every sink.
    pub async fn run(mut self) {
        info!("Starting ingest daemon...");
        info!("Monitoring queues: {}", self.registry.queue_names().join(", "));

        if !self.lifecycle.mark_running() {
            warn!("Stop requested before the daemon started");
        }

        while self.lifecycle.is_running() {
            self.poll_cycle().await;

            if !self.lifecycle.is_running() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.lifecycle.stopped() => {}
            }
        }

        self.cleanup().await;
        self.lifecycle.mark_stopped();
        if let Some(task) = self.signal_task.take() {
            if let Err(e) = task.await {
                debug!("Signal listener ended abnormally: {}", e);
            }
        }
        info!("Shutdown complete");
    }

    /// Drains every routed queue once. Queues not reached before a stop request
    /// are left alone and missing from the report.
    pub async fn poll_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        for route in self.registry.iter() {
            if self.lifecycle.is_stop_requested() {
                debug!("Stop requested, skipping remaining queues");
                break;
            }
            report.queues.push(self.drain_queue(route).await);
        }
        report
    }

    async fn drain_queue(&self, route: &Route) -> QueueReport {
        let queue = route.queue.as_str();
        let mut report = QueueReport::new(queue);

        let size = match self.queue.get_queue_size(queue).await {
            Ok(0) => return report,
            Ok(size) => size,
            Err(e) => {
                error!("Error checking size of queue '{}': {}", queue, e);
                return report;
            }
        };
        info!("Processing queue '{}' ({} items pending)", queue, size);

        while !self.lifecycle.is_stop_requested() {
            let reference = match self.queue.dequeue(queue).await {
                Ok(Some(reference)) => reference,
                Ok(None) => break,
                Err(e) => {
                    error!("Error dequeuing from '{}': {}", queue, e);
                    break;
                }
            };

            match self.process_item(route, &reference).await {
                ItemOutcome::Processed => report.processed += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        if report.processed > 0 || report.failed > 0 {
            info!(
                "Queue '{}' processing complete: {} successful, {} failed",
                queue, report.processed, report.failed
            );
        }
        report
    }

    async fn process_item(&self, route: &Route, reference: &str) -> ItemOutcome {
        let queue = route.queue.as_str();

        let payload = match self.queue.get_data(queue, reference).await {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                error!("No data found for {}, skipping", reference);
                return ItemOutcome::Failed;
            }
            Err(e) => {
                error!("Error retrieving data for {}: {}", reference, e);
                return ItemOutcome::Failed;
            }
        };

        match route.handler.apply(&payload).await {
            Ok(summary) => {
                info!("Successfully {}", summary);
                self.discard(queue, reference).await;
                ItemOutcome::Processed
            }
            Err(e) if e.is_poison() => {
                error!("Invalid data structure for {}: {}", reference, e);
                self.discard(queue, reference).await;
                ItemOutcome::Failed
            }
            Err(e) => {
                error!(
                    "Error processing {} with {}: {}",
                    reference,
                    route.handler.sink_name(),
                    e
                );
                warn!("Payload of {} kept in '{}' for manual requeue", reference, queue);
                ItemOutcome::Failed
            }
        }
    }

    async fn discard(&self, queue: &str, reference: &str) {
        if let Err(e) = self.queue.delete_data(queue, reference).await {
            error!("Error deleting data for {}: {}", reference, e);
        }
    }

    /// Closes every sink. A failing close is logged and does not stop the others.
    pub async fn cleanup(&self) {
        close_all(&self.registry).await;
    }
}

async fn close_all(registry: &RouteRegistry) {
    if registry.is_empty() {
        return;
    }
    info!("Closing sink connections...");
    for route in registry.iter() {
        let name = route.handler.sink_name();
        match route.handler.close().await {
            Ok(()) => info!("Closed {} for queue '{}'", name, route.queue),
            Err(e) => warn!("Error closing {} for queue '{}': {}", name, route.queue, e),
        }
    }
    info!("Sink connections closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::routes::{BadTickerHandler, FundamentalsHandler};
    use crate::daemon::testing::{
        LogCapture, MemoryQueue, RecordingBadTickerSink, RecordingFundamentalsSink,
    };
    use crate::daemon::DaemonState;
    use crate::sinks::SinkError;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    const BAD: &str = "bad_tickers";
    const FUND: &str = "fundamentals_static_queue";

    struct Harness {
        queue: Arc<MemoryQueue>,
        bad: Arc<RecordingBadTickerSink>,
        fundamentals: Arc<RecordingFundamentalsSink>,
        daemon: IngestDaemon,
    }

    fn harness_with(bad: RecordingBadTickerSink) -> Harness {
        let queue = Arc::new(MemoryQueue::new());
        let bad = Arc::new(bad);
        let fundamentals = Arc::new(RecordingFundamentalsSink::default());

        let mut registry = RouteRegistry::new();
        registry
            .register(BAD, Box::new(BadTickerHandler::new(bad.clone())))
            .unwrap();
        registry
            .register(FUND, Box::new(FundamentalsHandler::new(fundamentals.clone())))
            .unwrap();

        let daemon = IngestDaemon::new(
            queue.clone(),
            registry,
            Lifecycle::new(),
            Duration::from_millis(10),
        );
        Harness {
            queue,
            bad,
            fundamentals,
            daemon,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingBadTickerSink::default())
    }

    fn bad_ticker(ticker: &str) -> serde_json::Value {
        json!({"ticker": ticker, "timestamp": "2024-01-01T00:00:00Z", "reason": "no data"})
    }

    #[tokio::test]
    async fn test_empty_queue_is_never_dequeued() {
        let h = harness();
        let report = h.daemon.poll_cycle().await;

        assert_eq!(h.queue.size_calls(BAD), 1);
        assert_eq!(h.queue.dequeue_calls(BAD), 0);
        assert_eq!(h.queue.dequeue_calls(FUND), 0);
        assert_eq!(report.processed(), 0);
        assert_eq!(report.failed(), 0);
    }

    #[tokio::test]
    async fn test_single_bad_ticker_is_logged_and_deleted() {
        let h = harness();
        h.queue.push(BAD, "AAPL-1", bad_ticker("AAPL"));

        let report = h.daemon.poll_cycle().await;

        assert_eq!(
            h.bad.calls(),
            vec![(
                "AAPL".to_string(),
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                "no data".to_string()
            )]
        );
        assert!(!h.queue.has_data(BAD, "AAPL-1"));
        assert!(h.queue.pending(BAD).is_empty());
        assert_eq!(report.queue(BAD).unwrap().processed, 1);
    }

    #[tokio::test]
    async fn test_items_are_applied_in_fifo_order() {
        let h = harness();
        for ticker in ["AAA", "BBB", "CCC"] {
            h.queue.push(BAD, ticker, bad_ticker(ticker));
        }
        h.daemon.poll_cycle().await;
        assert_eq!(h.bad.tickers(), vec!["AAA", "BBB", "CCC"]);
    }

    #[tokio::test]
    async fn test_fundamentals_route_upserts_records() {
        let h = harness();
        h.queue.push(
            FUND,
            "MSFT",
            json!({"ticker": "MSFT", "sector": "Technology", "sic": 7372}),
        );

        let report = h.daemon.poll_cycle().await;

        let records = h.fundamentals.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticker, "MSFT");
        assert_eq!(records[0].sic.as_deref(), Some("7372"));
        assert!(!h.queue.has_data(FUND, "MSFT"));
        assert_eq!(report.queue(FUND).unwrap().processed, 1);
        assert!(h.bad.calls().is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_payload_and_continues() {
        let bad = RecordingBadTickerSink::default();
        bad.fail_ticker("FAIL");
        let h = harness_with(bad);
        h.queue.push(BAD, "r1", bad_ticker("FAIL"));
        h.queue.push(BAD, "r2", bad_ticker("GOOD"));

        let report = h.daemon.poll_cycle().await;

        assert_eq!(h.bad.tickers(), vec!["GOOD"]);
        // Reference consumed, payload orphaned.
        assert!(h.queue.has_data(BAD, "r1"));
        assert!(!h.queue.has_data(BAD, "r2"));
        assert!(h.queue.pending(BAD).is_empty());
        let counts = report.queue(BAD).unwrap();
        assert_eq!((counts.processed, counts.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_malformed_payload_is_deleted_as_failed() {
        let h = harness();
        h.queue
            .push(BAD, "broken", json!({"ticker": "", "timestamp": "2024-01-01", "reason": "x"}));
        h.queue.push(BAD, "ok", bad_ticker("OK"));

        let report = h.daemon.poll_cycle().await;

        assert!(!h.queue.has_data(BAD, "broken"));
        assert_eq!(h.bad.tickers(), vec!["OK"]);
        let counts = report.queue(BAD).unwrap();
        assert_eq!((counts.processed, counts.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_missing_and_undecodable_payloads_count_as_failed() {
        let h = harness();
        h.queue.push_reference_only(BAD, "ghost");
        h.queue.push(BAD, "garbled", bad_ticker("GARB"));
        h.queue.corrupt("garbled");

        let report = h.daemon.poll_cycle().await;

        assert!(h.bad.calls().is_empty());
        assert!(h.queue.has_data(BAD, "garbled"));
        assert_eq!(report.queue(BAD).unwrap().failed, 2);
    }

    #[tokio::test]
    async fn test_transport_error_on_one_queue_does_not_stop_the_cycle() {
        let log = LogCapture::default();
        let _guard = log.install();

        let h = harness();
        h.queue.break_queue(BAD);
        h.queue.push(FUND, "XOM", json!({"ticker": "XOM"}));

        let report = h.daemon.poll_cycle().await;

        assert_eq!(report.queue(FUND).unwrap().processed, 1);
        assert_eq!(report.queue(BAD).unwrap(), &QueueReport::new(BAD));
        assert!(log.contents().contains("Error checking size of queue 'bad_tickers'"));
    }

    #[tokio::test]
    async fn test_cleanup_closes_every_sink_even_when_one_fails() {
        let log = LogCapture::default();
        let _guard = log.install();

        let h = harness_with(RecordingBadTickerSink::failing_close());
        h.daemon.cleanup().await;

        assert_eq!(h.bad.closes(), 1);
        assert_eq!(h.fundamentals.closes(), 1);
        let output = log.contents();
        assert!(output.contains("WARN"));
        assert!(output.contains("Error closing BadTickerClient"));
        assert!(output.contains("Closed FundamentalsClient"));
        assert!(output.contains("Sink connections closed"));
    }

    #[tokio::test]
    async fn test_stop_request_logs_signal_and_clears_running() {
        let log = LogCapture::default();
        let _guard = log.install();

        let h = harness();
        let lifecycle = h.daemon.lifecycle();
        lifecycle.mark_running();
        lifecycle.request_stop("SIGTERM");

        assert!(!lifecycle.is_running());
        assert!(log
            .contents()
            .contains("Received SIGTERM, initiating graceful shutdown..."));
    }

    #[tokio::test]
    async fn test_stop_request_prevents_further_dequeues() {
        let h = harness();
        h.queue.push(BAD, "r1", bad_ticker("ONE"));
        h.queue.push(BAD, "r2", bad_ticker("TWO"));
        h.daemon.lifecycle().request_stop("SIGINT");

        let report = h.daemon.poll_cycle().await;

        assert_eq!(report.processed(), 0);
        assert!(report.queues.is_empty());
        assert_eq!(h.queue.pending(BAD), vec!["r1", "r2"]);
        assert_eq!(h.queue.size_calls(BAD), 0);
        assert_eq!(h.queue.size_calls(FUND), 0);
    }

    struct StopsOnApply(Lifecycle);

    #[async_trait::async_trait]
    impl crate::daemon::ItemHandler for StopsOnApply {
        fn sink_name(&self) -> &str {
            "StopsOnApply"
        }

        async fn apply(&self, _payload: &serde_json::Value) -> Result<String, SinkError> {
            self.0.request_stop("SIGTERM");
            Ok("stopped the daemon".to_string())
        }

        async fn close(&self) -> Result<(), SinkError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_stop_mid_cycle_skips_remaining_queues() {
        let queue = Arc::new(MemoryQueue::new());
        let lifecycle = Lifecycle::new();
        let fundamentals = Arc::new(RecordingFundamentalsSink::default());
        let mut registry = RouteRegistry::new();
        registry
            .register(BAD, Box::new(StopsOnApply(lifecycle.clone())))
            .unwrap();
        registry
            .register(FUND, Box::new(FundamentalsHandler::new(fundamentals.clone())))
            .unwrap();
        let daemon = IngestDaemon::new(
            queue.clone(),
            registry,
            lifecycle,
            Duration::from_millis(10),
        );

        queue.push(BAD, "r1", bad_ticker("ONE"));
        queue.push(BAD, "r2", bad_ticker("TWO"));
        queue.push(FUND, "MSFT", json!({"ticker": "MSFT"}));

        let report = daemon.poll_cycle().await;

        assert_eq!(report.queues.len(), 1);
        assert_eq!(report.queue(BAD).unwrap().processed, 1);
        assert_eq!(queue.pending(BAD), vec!["r2"]);
        assert_eq!(queue.size_calls(FUND), 0);
        assert!(fundamentals.records().is_empty());
    }

    #[tokio::test]
    async fn test_run_exits_on_stop_and_closes_sinks() {
        let h = harness();
        h.queue.push(BAD, "r1", bad_ticker("AAPL"));
        let lifecycle = h.daemon.lifecycle();
        let bad = h.bad.clone();
        let task = tokio::spawn(h.daemon.run());

        // Let the first cycle run, then stop during the inter-cycle sleep.
        for _ in 0..100 {
            if !bad.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        lifecycle.request_stop("SIGTERM");

        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("daemon did not stop")
            .unwrap();
        assert_eq!(lifecycle.state(), DaemonState::Stopped);
        assert_eq!(bad.tickers(), vec!["AAPL"]);
        assert_eq!(bad.closes(), 1);
        assert_eq!(h.fundamentals.closes(), 1);
    }
}
