//! # Sink Admin
//!
//! Operator tool for the PostgreSQL sink tables the daemon writes:
//! - `bad-tickers` / `check` / `unflag`: inspect and clear the bad-ticker log,
//! - `missing` / `report-missing` / `clear-missing`: the missing-ticker list,
//! - `fundamentals`: the stored row of one ticker.
//!
//! Reads `DATABASE_URL` (or `--database-url`) like `sink_daemon`.

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use lib_ingest::configs::{PostgresConfig, load_dotenv};
use lib_ingest::init_logging;
use lib_ingest::sinks::{
    BadTickerClient, BadTickerRecord, BadTickerSink, FundamentalsClient, FundamentalsRecord,
    FundamentalsSink,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspects the PostgreSQL sink tables", long_about = None)]
struct Cli {
    #[command(flatten)]
    postgres: PostgresConfig,

    /// Logging level (trace, debug, info, warn, error).
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists the most recently flagged bad tickers.
    BadTickers {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Tells whether a ticker is flagged as bad.
    Check { ticker: String },
    /// Removes a ticker from the bad-ticker log.
    Unflag { ticker: String },
    /// Lists the most recently reported missing tickers.
    Missing {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Records tickers as missing from a source.
    ReportMissing {
        #[arg(long, default_value = "manual")]
        source: String,
        #[arg(required = true)]
        tickers: Vec<String>,
    },
    /// Empties the missing-ticker list.
    ClearMissing,
    /// Prints the stored fundamentals of a ticker.
    Fundamentals { ticker: String },
}

fn render_bad_tickers(records: &[BadTickerRecord]) -> String {
    if records.is_empty() {
        return "No bad tickers recorded\n".to_string();
    }
    records
        .iter()
        .map(|r| format!("{}\t{}\t{}\n", r.ticker, r.timestamp.to_rfc3339(), r.reason))
        .collect()
}

fn render_fundamentals(record: &FundamentalsRecord) -> String {
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    format!(
        "Ticker: {}\n  Sector: {}\n  Industry: {}\n  Entity: {}\n  SIC: {}\n",
        record.ticker,
        field(&record.sector),
        field(&record.industry),
        field(&record.entity_name),
        field(&record.sic)
    )
}

async fn run_bad_ticker_command(client: &BadTickerClient, command: Command) -> anyhow::Result<()> {
    match command {
        Command::BadTickers { limit } => {
            print!("{}", render_bad_tickers(&client.get_bad_tickers(limit).await?));
        }
        Command::Check { ticker } => {
            let flagged = client.is_bad_ticker(&ticker).await?;
            println!("{ticker}: {}", if flagged { "bad" } else { "not flagged" });
        }
        Command::Unflag { ticker } => {
            if !client.remove_bad_ticker(&ticker).await? {
                bail!("{ticker} is not flagged");
            }
            println!("Removed {ticker} from bad tickers");
        }
        Command::Missing { limit } => {
            for ticker in client.get_missing_tickers(limit).await? {
                println!("{ticker}");
            }
        }
        Command::ReportMissing { source, tickers } => {
            let stored = client.store_missing_tickers(&tickers, &source).await;
            println!("Stored {stored} of {} missing tickers", tickers.len());
            if stored < tickers.len() {
                bail!("{} tickers could not be stored", tickers.len() - stored);
            }
        }
        Command::ClearMissing => {
            let removed = client.clear_missing_tickers().await?;
            println!("Cleared {removed} missing tickers");
        }
        other => bail!("not a bad ticker command: {:?}", other),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();
    let _guard = init_logging(&cli.log_level, None, "sink_admin")?;

    match cli.command {
        Command::Fundamentals { ticker } => {
            let client = FundamentalsClient::connect(&cli.postgres)
                .await
                .context("cannot open the fundamentals table")?;
            let result = client.get_fundamentals(&ticker).await;
            FundamentalsSink::close(&client).await?;
            match result? {
                Some(record) => print!("{}", render_fundamentals(&record)),
                None => bail!("no fundamentals stored for {ticker}"),
            }
        }
        command => {
            let client = BadTickerClient::connect(&cli.postgres)
                .await
                .context("cannot open the bad ticker tables")?;
            let result = run_bad_ticker_command(&client, command).await;
            BadTickerSink::close(&client).await?;
            result?;
        }
    }
    Ok(())
}
