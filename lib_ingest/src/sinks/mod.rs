//! # Sinks Module
//!
//! Downstream stores the ingest daemon applies queue payloads to, and the payload
//! records they accept.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::connections::DbError;

/// PostgreSQL log of invalid and missing tickers.
pub mod bad_ticker;
/// PostgreSQL table of static company fundamentals.
pub mod fundamentals;
pub mod records;

pub use bad_ticker::BadTickerClient;
pub use fundamentals::FundamentalsClient;
pub use records::{BadTickerRecord, FundamentalsRecord};

#[derive(Debug, Error)]
pub enum SinkError {
    /// The payload can never be applied, whatever the state of the sink.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Database(#[from] DbError),
}

impl From<sqlx::Error> for SinkError {
    fn from(e: sqlx::Error) -> Self {
        SinkError::Database(DbError::from(e))
    }
}

impl SinkError {
    /// Whether retrying the same payload is pointless.
    pub fn is_poison(&self) -> bool {
        matches!(self, SinkError::InvalidPayload(_))
    }
}

/// Store of tickers the producers could not use.
#[async_trait]
pub trait BadTickerSink: Send + Sync {
    /// Records `ticker` as bad, replacing any earlier entry for it.
    async fn log_bad_ticker(
        &self,
        ticker: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SinkError>;

    /// Releases the sink's resources. Idempotent and safe without prior use.
    async fn close(&self) -> Result<(), SinkError>;
}

/// Store of static company fundamentals keyed by ticker.
#[async_trait]
pub trait FundamentalsSink: Send + Sync {
    /// Inserts or replaces the row for `record.ticker`.
    async fn upsert_fundamentals(&self, record: &FundamentalsRecord) -> Result<(), SinkError>;

    /// Releases the sink's resources. Idempotent and safe without prior use.
    async fn close(&self) -> Result<(), SinkError>;
}
