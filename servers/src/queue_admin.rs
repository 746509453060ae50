//! # Queue Admin
//!
//! Operator tool for the Redis work queues:
//! - `ping`: store liveness,
//! - `status`: pending counts with a peek at the head of each queue,
//! - `enqueue`: push a payload by hand,
//! - `requeue` / `purge`: recover or drop an orphaned payload (a requeue never
//!   duplicates a reference that is still pending).
//!
//! `requeue` and `purge` hold the `maintenance:{queue}` lock while they run, so two
//! operators cannot work on the same queue at once.

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use lib_ingest::configs::{
    BAD_TICKER_QUEUE_NAME, DEFAULT_QUEUE_NAMESPACE, FUNDAMENTALS_STATIC_QUEUE_NAME, RedisConfig,
    load_dotenv,
};
use lib_ingest::coordination::{LockClient, QueueBroker, RequeueOutcome, WorkQueue};
use lib_ingest::{CacheConnection, TracingMetrics, init_logging};
use serde_json::Value;
use tracing::{error, info};

/// Lease of the maintenance lock, in seconds.
const MAINTENANCE_LEASE_SECS: u64 = 60;
const PEEK_LIMIT: usize = 10;
const SAMPLE_LIMIT: usize = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspects and repairs the Redis work queues", long_about = None)]
struct Cli {
    #[command(flatten)]
    redis: RedisConfig,

    /// Key namespace shared with producers and the daemon.
    #[arg(long, env = "QUEUE_NAMESPACE", default_value = DEFAULT_QUEUE_NAMESPACE)]
    namespace: String,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Checks that the store answers PING.
    Ping,
    /// Prints size and head of the given queues (default: the daemon's queues).
    Status { queues: Vec<String> },
    /// Stores a JSON payload and appends its reference to a queue.
    Enqueue {
        queue: String,
        reference: String,
        payload: String,
        /// Payload expiry in seconds.
        #[arg(long)]
        ttl: Option<u64>,
    },
    /// Puts a consumed reference back on its queue if the payload still exists.
    Requeue { queue: String, reference: String },
    /// Deletes the payload of a reference.
    Purge { queue: String, reference: String },
}

/// What `status` reports for one queue.
#[derive(Debug, Default, PartialEq)]
struct QueueStatus {
    queue: String,
    size: usize,
    head: Vec<String>,
    /// `(reference, ticker)` of the first few payloads that still exist.
    samples: Vec<(String, Option<String>)>,
}

async fn collect_status(broker: &QueueBroker, queue: &str) -> anyhow::Result<QueueStatus> {
    let size = broker.get_queue_size(queue).await?;
    let head = broker.peek_queue(queue, PEEK_LIMIT).await?;

    let mut samples = Vec::new();
    for reference in head.iter().take(SAMPLE_LIMIT) {
        match broker.get_data(queue, reference).await {
            Ok(Some(payload)) => samples.push((reference.clone(), ticker_of(&payload))),
            Ok(None) => {}
            Err(e) => error!("Cannot read payload of {}: {}", reference, e),
        }
    }

    Ok(QueueStatus {
        queue: queue.to_string(),
        size,
        head,
        samples,
    })
}

fn ticker_of(payload: &Value) -> Option<String> {
    payload
        .get("ticker")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn render_status(statuses: &[QueueStatus]) -> String {
    let rule = "=".repeat(70);
    let mut out = String::new();
    let _ = writeln!(out, "{rule}\nRedis Queue Status Report\n{rule}\n");

    for status in statuses {
        let _ = writeln!(out, "Queue: {}", status.queue);
        let _ = writeln!(out, "  Size: {} items pending", status.size);
        if status.size == 0 {
            let _ = writeln!(out, "  Status: Empty");
        } else {
            let _ = writeln!(out, "  Head: {}", status.head.join(", "));
            if !status.samples.is_empty() {
                let _ = writeln!(out, "  Sample data:");
                for (reference, ticker) in &status.samples {
                    match ticker {
                        Some(ticker) => {
                            let _ = writeln!(out, "    - {reference} (ticker: {ticker})");
                        }
                        None => {
                            let _ = writeln!(out, "    - {reference}");
                        }
                    }
                }
            }
        }
        let _ = writeln!(out);
    }

    let total: usize = statuses.iter().map(|s| s.size).sum();
    let _ = writeln!(out, "{rule}\nTotal items pending across all queues: {total}\n{rule}");
    if total > 0 {
        let _ = writeln!(out, "Items are pending: check that sink_daemon is running.");
    }
    out
}

/// Runs `op` while holding the maintenance lock of `queue`.
async fn with_maintenance_lock<T, F>(locks: &LockClient, queue: &str, op: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let name = format!("maintenance:{queue}");
    let Some(token) = locks.acquire(&name, MAINTENANCE_LEASE_SECS).await? else {
        let holder = locks.holder(&name).await.ok().flatten();
        bail!(
            "queue '{}' is under maintenance by another process (token {})",
            queue,
            holder.as_deref().unwrap_or("unknown")
        );
    };

    let result = op.await;

    match locks.release(&name, token.as_str()).await {
        Ok(true) => {}
        Ok(false) => error!("Maintenance lock {} expired before release", name),
        Err(e) => error!("Failed to release maintenance lock {}: {}", name, e),
    }
    result
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_level, None, "queue_admin")?;

    let cache = CacheConnection::connect(&cli.redis, cli.namespace.clone())
        .await
        .with_context(|| format!("cannot reach {}", cli.redis))?;
    let broker = QueueBroker::new(cache.clone());

    match cli.command {
        Command::Ping => {
            let alive = broker.ping().await?;
            println!("{}: {}", cli.redis, if alive { "PONG" } else { "no answer" });
            if !alive {
                bail!("store did not answer PING");
            }
        }
        Command::Status { queues } => {
            let queues = if queues.is_empty() {
                vec![
                    BAD_TICKER_QUEUE_NAME.to_string(),
                    FUNDAMENTALS_STATIC_QUEUE_NAME.to_string(),
                ]
            } else {
                queues
            };
            let mut statuses = Vec::with_capacity(queues.len());
            for queue in &queues {
                statuses.push(collect_status(&broker, queue).await?);
            }
            print!("{}", render_status(&statuses));
        }
        Command::Enqueue {
            queue,
            reference,
            payload,
            ttl,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let size = match ttl {
                Some(ttl) => broker.enqueue_with_ttl(&queue, &reference, &payload, ttl).await?,
                None => broker.enqueue(&queue, &reference, &payload).await?,
            };
            println!("Enqueued {reference} to {queue} (queue size: {size})");
        }
        Command::Requeue { queue, reference } => {
            let locks = LockClient::new(cache).with_metrics(Arc::new(TracingMetrics));
            let outcome = with_maintenance_lock(&locks, &queue, async {
                broker
                    .requeue(&queue, &reference)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;
            match outcome {
                RequeueOutcome::Requeued(size) => {
                    info!("Requeued {} to {}", reference, queue);
                    println!("Requeued {reference} to {queue} (queue size: {size})");
                }
                RequeueOutcome::AlreadyPending => {
                    println!("{reference} is already pending in {queue}; nothing to do");
                }
                RequeueOutcome::PayloadMissing => {
                    bail!("no payload stored for {reference} in {queue}");
                }
            }
        }
        Command::Purge { queue, reference } => {
            let locks = LockClient::new(cache).with_metrics(Arc::new(TracingMetrics));
            let deleted = with_maintenance_lock(&locks, &queue, async {
                broker
                    .delete_data(&queue, &reference)
                    .await
                    .map_err(anyhow::Error::from)
            })
            .await?;
            println!(
                "{} payload of {reference} in {queue}",
                if deleted { "Deleted" } else { "No" }
            );
        }
    }

    Ok(())
}
