//! # Sink Daemon
//!
//! Drains the Redis work queues into PostgreSQL until SIGINT/SIGTERM.
//!
//! ## Configuration
//! Every flag has an environment fallback and a `.env` file in the working
//! directory is loaded first:
//! - Redis: `REDIS_HOST`, `REDIS_PORT`, `REDIS_DB`, `REDIS_PASSWORD`,
//!   `REDIS_SOCKET_TIMEOUT`, `REDIS_CONNECT_TIMEOUT`
//! - PostgreSQL: `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_ACQUIRE_TIMEOUT`
//! - Daemon: `QUEUE_NAMESPACE`, `POLL_INTERVAL`, `DAEMON_ROUTES`, `LOG_LEVEL`, `LOG_DIR`
//!
//! Exits non-zero when the store, a sink or the route table cannot be set up.

use anyhow::Context;
use clap::Parser;
use lib_ingest::configs::{load_dotenv, DaemonConfig, PostgresConfig, RedisConfig};
use lib_ingest::{init_logging, IngestDaemon};
use tracing::info;

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Drains bad-ticker and fundamentals queues from Redis into PostgreSQL."
)]
struct Cli {
    #[command(flatten)]
    redis: RedisConfig,

    #[command(flatten)]
    postgres: PostgresConfig,

    #[command(flatten)]
    daemon: DaemonConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let dotenv = load_dotenv();
    let cli = Cli::parse();

    let _guard = init_logging(
        &cli.daemon.log_level,
        cli.daemon.log_dir.as_deref(),
        "sink_daemon",
    )?;
    if let Some(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    info!(
        "Configuration loaded: Redis {}, DB URL (hidden), namespace '{}', poll every {}s",
        cli.redis, cli.daemon.namespace, cli.daemon.poll_interval_secs
    );

    let daemon = IngestDaemon::bootstrap(&cli.redis, &cli.postgres, &cli.daemon)
        .await
        .context("failed to start the ingest daemon")?;
    info!("{} route(s) ready", daemon.routes().len());

    daemon.run().await;
    Ok(())
}
