use async_trait::async_trait;
use tracing::{debug, error, info};

use super::{FundamentalsRecord, FundamentalsSink, SinkError};
use crate::configs::PostgresConfig;
use crate::connections::{Database, DbError};

const CREATE_FUNDAMENTALS: &str = r#"
CREATE TABLE IF NOT EXISTS fundamentals (
    ticker TEXT PRIMARY KEY,
    sector TEXT,
    industry TEXT,
    entity_name TEXT,
    sic TEXT
)
"#;

type FundamentalsRow = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

/// Client for the `fundamentals` table.
#[derive(Debug, Clone)]
pub struct FundamentalsClient {
    db: Database,
}

impl FundamentalsClient {
    pub async fn connect(config: &PostgresConfig) -> Result<Self, DbError> {
        let db = Database::connect(config).await?;
        Self::with_database(db).await
    }

    pub async fn with_database(db: Database) -> Result<Self, DbError> {
        db.execute(CREATE_FUNDAMENTALS)
            .await
            .inspect_err(|e| error!("Error creating fundamentals table: {}", e))?;
        info!("fundamentals table created or already exists");
        Ok(Self { db })
    }

    pub async fn get_fundamentals(
        &self,
        ticker: &str,
    ) -> Result<Option<FundamentalsRecord>, SinkError> {
        let row: Option<FundamentalsRow> = sqlx::query_as(
            "SELECT ticker, sector, industry, entity_name, sic FROM fundamentals WHERE ticker = $1",
        )
        .bind(ticker)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(
            |(ticker, sector, industry, entity_name, sic)| FundamentalsRecord {
                ticker,
                sector,
                industry,
                entity_name,
                sic,
            },
        ))
    }
}

#[async_trait]
impl FundamentalsSink for FundamentalsClient {
    async fn upsert_fundamentals(&self, record: &FundamentalsRecord) -> Result<(), SinkError> {
        sqlx::query(
            r#"
            INSERT INTO fundamentals (ticker, sector, industry, entity_name, sic)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (ticker) DO UPDATE
                SET sector = EXCLUDED.sector,
                    industry = EXCLUDED.industry,
                    entity_name = EXCLUDED.entity_name,
                    sic = EXCLUDED.sic
            "#,
        )
        .bind(&record.ticker)
        .bind(&record.sector)
        .bind(&record.industry)
        .bind(&record.entity_name)
        .bind(&record.sic)
        .execute(self.db.pool())
        .await
        .inspect_err(|e| error!("Error upserting fundamentals for {}: {}", record.ticker, e))?;

        debug!("Upserted fundamentals for ticker: {}", record.ticker);
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.db.close().await;
        Ok(())
    }
}
