use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use common::{Candle, Error, MarketDataGateway, Quote, Result, Timeframe};

/// In-memory market fed by the caller.
///
/// Candles are returned as set (timeframe is not checked). Quotes can be
/// scripted: queued quotes are served one per request, after which the last
/// quote set with [`SimulatedMarket::set_quote`] is repeated.
#[derive(Default)]
pub struct SimulatedMarket {
    candles: RwLock<HashMap<String, Vec<Candle>>>,
    quotes: RwLock<HashMap<String, Quote>>,
    scripted: RwLock<HashMap<String, VecDeque<Option<Quote>>>>,
}

impl SimulatedMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.write().await.insert(symbol.to_string(), candles);
    }

    pub async fn set_quote(&self, symbol: &str, bid: f64, ask: f64) {
        let quote = Quote { bid, ask, time: Utc::now() };
        self.quotes.write().await.insert(symbol.to_string(), quote);
    }

    pub async fn clear_quote(&self, symbol: &str) {
        self.quotes.write().await.remove(symbol);
    }

    /// Queue quotes served before the standing quote. `None` simulates a
    /// sample where the feed has nothing.
    pub async fn script_quotes(&self, symbol: &str, quotes: impl IntoIterator<Item = Option<(f64, f64)>>) {
        let now = Utc::now();
        let queue = quotes
            .into_iter()
            .map(|q| q.map(|(bid, ask)| Quote { bid, ask, time: now }))
            .collect();
        self.scripted.write().await.insert(symbol.to_string(), queue);
    }
}

#[async_trait]
impl MarketDataGateway for SimulatedMarket {
    async fn get_recent_candles(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        let candles = self.candles.read().await;
        let series = candles
            .get(symbol)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::DataUnavailable(format!("no candles loaded for {symbol}")))?;
        let start = series.len().saturating_sub(count);
        Ok(series[start..].to_vec())
    }

    async fn get_current_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        if let Some(queue) = self.scripted.write().await.get_mut(symbol) {
            if let Some(next) = queue.pop_front() {
                return Ok(next);
            }
        }
        Ok(self.quotes.read().await.get(symbol).copied())
    }
}
