//! Queue to sink routing.
//!
//! Every route pairs one queue with one [`ItemHandler`]. Handlers turn a raw payload
//! into the typed sink call; which sink a queue feeds is fixed by its [`SinkKind`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::configs::{ConfigError, PostgresConfig, SinkKind};
use crate::connections::DbError;
use crate::sinks::{
    BadTickerClient, BadTickerRecord, BadTickerSink, FundamentalsClient, FundamentalsRecord,
    FundamentalsSink, SinkError,
};

/// Applies one queue payload to a sink.
#[async_trait]
pub trait ItemHandler: Send + Sync {
    /// Name used in log lines, e.g. `BadTickerClient`.
    fn sink_name(&self) -> &str;

    /// Validates `payload` and writes it to the sink.
    ///
    /// Returns a one-line summary of what was written. A payload that can never be
    /// applied is reported as [`SinkError::InvalidPayload`].
    async fn apply(&self, payload: &Value) -> Result<String, SinkError>;

    async fn close(&self) -> Result<(), SinkError>;
}

pub struct BadTickerHandler {
    sink: Arc<dyn BadTickerSink>,
}

impl BadTickerHandler {
    pub fn new(sink: Arc<dyn BadTickerSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ItemHandler for BadTickerHandler {
    fn sink_name(&self) -> &str {
        "BadTickerClient"
    }

    async fn apply(&self, payload: &Value) -> Result<String, SinkError> {
        let record = BadTickerRecord::from_payload(payload)?;
        self.sink
            .log_bad_ticker(&record.ticker, record.timestamp, &record.reason)
            .await?;
        Ok(format!("logged bad ticker: {} - {}", record.ticker, record.reason))
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.sink.close().await
    }
}

pub struct FundamentalsHandler {
    sink: Arc<dyn FundamentalsSink>,
}

impl FundamentalsHandler {
    pub fn new(sink: Arc<dyn FundamentalsSink>) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl ItemHandler for FundamentalsHandler {
    fn sink_name(&self) -> &str {
        "FundamentalsClient"
    }

    async fn apply(&self, payload: &Value) -> Result<String, SinkError> {
        let record = FundamentalsRecord::from_payload(payload)?;
        self.sink.upsert_fundamentals(&record).await?;
        Ok(format!("upserted fundamentals for ticker: {}", record.ticker))
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.sink.close().await
    }
}

/// Connects the PostgreSQL sink behind `kind` and wraps it in its handler.
pub async fn connect_handler(
    kind: SinkKind,
    postgres: &PostgresConfig,
) -> Result<Box<dyn ItemHandler>, DbError> {
    let handler: Box<dyn ItemHandler> = match kind {
        SinkKind::BadTicker => {
            let client = BadTickerClient::connect(postgres).await?;
            Box::new(BadTickerHandler::new(Arc::new(client)))
        }
        SinkKind::Fundamentals => {
            let client = FundamentalsClient::connect(postgres).await?;
            Box::new(FundamentalsHandler::new(Arc::new(client)))
        }
    };
    Ok(handler)
}

pub struct Route {
    pub queue: String,
    pub handler: Box<dyn ItemHandler>,
}

/// Routes in registration order, which is also the drain order of a poll cycle.
#[derive(Default)]
pub struct RouteRegistry {
    routes: Vec<Route>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        queue: impl Into<String>,
        handler: Box<dyn ItemHandler>,
    ) -> Result<(), ConfigError> {
        let queue = queue.into();
        if self.routes.iter().any(|r| r.queue == queue) {
            return Err(ConfigError::DuplicateRoute(queue));
        }
        self.routes.push(Route { queue, handler });
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    pub fn queue_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.queue.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
