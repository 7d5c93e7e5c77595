use async_trait::async_trait;

use crate::{Candle, OrderOutcome, Position, Quote, Result, Timeframe, TradeIntent};

/// Source of candles and quotes for a symbol.
///
/// Implementations may be shared by every symbol loop at once, so they must
/// handle their own synchronization. Latency and staleness are their concern.
#[async_trait]
pub trait MarketDataGateway: Send + Sync {
    /// The most recent `count` candles, oldest first. May include the candle
    /// that is still forming as the last element.
    ///
    /// Fails with `Error::DataUnavailable` when the session is not ready.
    async fn get_recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>>;

    /// Current top of book, or `None` when no quote is available right now.
    async fn get_current_quote(&self, symbol: &str) -> Result<Option<Quote>>;
}

/// Broker account: open positions and order submission.
///
/// Only the position manager in `crates/position` submits intents through
/// this trait.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Open positions for `symbol`; empty when flat.
    async fn get_open_positions(&self, symbol: &str) -> Result<Vec<Position>>;

    /// Submit one intent. A broker-side refusal is `Ok` with `success == false`;
    /// `Err` is reserved for transport or session failures.
    async fn submit_order(&self, intent: &TradeIntent) -> Result<OrderOutcome>;
}
