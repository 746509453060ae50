use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use super::{BadTickerRecord, BadTickerSink, SinkError};
use crate::configs::PostgresConfig;
use crate::connections::{Database, DbError};

const CREATE_BAD_TICKERS: &str = r#"
CREATE TABLE IF NOT EXISTS bad_tickers (
    ticker TEXT PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    reason TEXT NOT NULL
)
"#;

const CREATE_MISSING_TICKERS: &str = r#"
CREATE TABLE IF NOT EXISTS missing_tickers (
    ticker TEXT PRIMARY KEY,
    timestamp TIMESTAMPTZ NOT NULL,
    source TEXT NOT NULL
)
"#;

/// Client for the `bad_tickers` and `missing_tickers` tables.
#[derive(Debug, Clone)]
pub struct BadTickerClient {
    db: Database,
}

impl BadTickerClient {
    /// Connects and makes sure both tables exist.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DbError> {
        let db = Database::connect(config).await?;
        Self::with_database(db).await
    }

    /// Uses an existing pool. The tables are created if missing.
    pub async fn with_database(db: Database) -> Result<Self, DbError> {
        for (table, ddl) in [
            ("bad_tickers", CREATE_BAD_TICKERS),
            ("missing_tickers", CREATE_MISSING_TICKERS),
        ] {
            if let Err(e) = db.execute(ddl).await {
                error!("Error creating {} table: {}", table, e);
                return Err(e);
            }
            info!("{} table created or already exists", table);
        }
        Ok(Self { db })
    }

    /// Most recently flagged tickers first.
    pub async fn get_bad_tickers(&self, limit: i64) -> Result<Vec<BadTickerRecord>, SinkError> {
        let rows: Vec<(String, DateTime<Utc>, String)> = sqlx::query_as(
            "SELECT ticker, timestamp, reason FROM bad_tickers ORDER BY timestamp DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(ticker, timestamp, reason)| BadTickerRecord {
                ticker,
                timestamp,
                reason,
            })
            .collect())
    }

    pub async fn is_bad_ticker(&self, ticker: &str) -> Result<bool, SinkError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM bad_tickers WHERE ticker = $1")
            .bind(ticker)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Returns whether a row was removed.
    pub async fn remove_bad_ticker(&self, ticker: &str) -> Result<bool, SinkError> {
        let done = sqlx::query("DELETE FROM bad_tickers WHERE ticker = $1")
            .bind(ticker)
            .execute(self.db.pool())
            .await?;
        debug!("Removed bad ticker: {}", ticker);
        Ok(done.rows_affected() > 0)
    }

    /// Upserts every ticker with the current time and `source`.
    ///
    /// Each ticker is written on its own; a failing ticker is logged and skipped.
    /// Returns how many were stored.
    pub async fn store_missing_tickers(&self, tickers: &[String], source: &str) -> usize {
        let now = Utc::now();
        let mut stored = 0;
        for ticker in tickers {
            let result = sqlx::query(
                r#"
                INSERT INTO missing_tickers (ticker, timestamp, source)
                VALUES ($1, $2, $3)
                ON CONFLICT (ticker) DO UPDATE
                    SET timestamp = EXCLUDED.timestamp,
                        source = EXCLUDED.source
                "#,
            )
            .bind(ticker)
            .bind(now)
            .bind(source)
            .execute(self.db.pool())
            .await;

            match result {
                Ok(_) => stored += 1,
                Err(e) => error!("Error storing missing ticker {}: {}", ticker, e),
            }
        }
        stored
    }

    /// Most recently reported missing tickers first.
    pub async fn get_missing_tickers(&self, limit: i64) -> Result<Vec<String>, SinkError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT ticker FROM missing_tickers ORDER BY timestamp DESC LIMIT $1")
                .bind(limit)
                .fetch_all(self.db.pool())
                .await?;
        Ok(rows.into_iter().map(|(ticker,)| ticker).collect())
    }

    /// Empties `missing_tickers` and returns how many rows were removed.
    pub async fn clear_missing_tickers(&self) -> Result<u64, SinkError> {
        let removed = self.db.execute("DELETE FROM missing_tickers").await?;
        info!("Cleared missing_tickers table ({} rows)", removed);
        Ok(removed)
    }
}

#[async_trait]
impl BadTickerSink for BadTickerClient {
    async fn log_bad_ticker(
        &self,
        ticker: &str,
        timestamp: DateTime<Utc>,
        reason: &str,
    ) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO bad_tickers (ticker, timestamp, reason)
            VALUES ($1, $2, $3)
            ON CONFLICT (ticker) DO UPDATE
                SET timestamp = EXCLUDED.timestamp,
                    reason = EXCLUDED.reason
            "#,
        )
        .bind(ticker)
        .bind(timestamp)
        .bind(reason)
        .execute(self.db.pool())
        .await
        .inspect_err(|e| error!("Error logging bad ticker {}: {}", ticker, e))?;

        debug!("Logged bad ticker: {} - {}", ticker, reason);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.db.close().await;
        Ok(())
    }
}
