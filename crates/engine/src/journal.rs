use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::RwLock;
use tracing::{error, info};

use common::{Error, EventSink, Result, TradeEvent};

/// Writes every trade event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl EventSink for TracingSink {
    async fn record(&self, event: TradeEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        info!(symbol = %event.symbol(), kind = event.kind(), %payload, "Trade event");
    }
}

/// Keeps events in memory, oldest first.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: RwLock<Vec<TradeEvent>>,
}

impl MemorySink {
    pub async fn events(&self) -> Vec<TradeEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn record(&self, event: TradeEvent) {
        self.events.write().await.push(event);
    }
}

/// Forwards each event to every inner sink in order.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn record(&self, event: TradeEvent) {
        for sink in &self.sinks {
            sink.record(event.clone()).await;
        }
    }
}

/// Persists trade events to SQLite, one row per event with the full event
/// as a JSON payload.
#[derive(Clone)]
pub struct SqliteJournal {
    db: SqlitePool,
}

impl SqliteJournal {
    /// Connect and run pending migrations. Use `sqlite://path?mode=rwc` to
    /// create the file on first start.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        sqlx::migrate!("../../migrations")
            .run(&db)
            .await
            .map_err(|e| Error::Other(format!("journal migration failed: {e}")))?;
        info!(url = %database_url, "Trade journal ready");
        Ok(Self { db })
    }

    async fn insert(&self, event: &TradeEvent) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        sqlx::query(
            r#"
            INSERT INTO trade_events (id, recorded_at, symbol, kind, payload)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(event.symbol())
        .bind(event.kind())
        .bind(payload)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Journaled events for `symbol`, oldest first.
    pub async fn events_for(&self, symbol: &str) -> Result<Vec<TradeEvent>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT payload FROM trade_events WHERE symbol = ?1 ORDER BY recorded_at, rowid",
        )
        .bind(symbol)
        .fetch_all(&self.db)
        .await?;
        rows.iter()
            .map(|p| serde_json::from_str(p).map_err(Error::from))
            .collect()
    }
}

#[async_trait]
impl EventSink for SqliteJournal {
    async fn record(&self, event: TradeEvent) {
        if let Err(e) = self.insert(&event).await {
            error!(symbol = %event.symbol(), kind = event.kind(), error = %e, "Failed to persist trade event");
        }
    }
}
