use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLC bar. Immutable once fetched from the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    /// High-low range of the bar.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Top-of-book quote for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Price a market order on `side` would fill at: buys lift the ask,
    /// sells hit the bid.
    pub fn price_for(&self, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => self.ask,
            OrderSide::Sell => self.bid,
        }
    }

    /// Price an existing position on `side` would be closed at.
    pub fn exit_price_for(&self, side: OrderSide) -> f64 {
        self.price_for(side.opposite())
    }
}

/// Side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Candle timeframe requested from the market data gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn duration(self) -> Duration {
        let minutes = match self {
            Timeframe::M1 => 1,
            Timeframe::M5 => 5,
            Timeframe::M15 => 15,
            Timeframe::M30 => 30,
            Timeframe::H1 => 60,
            Timeframe::H4 => 240,
            Timeframe::D1 => 1440,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Timeframe::M1 => "M1",
            Timeframe::M5 => "M5",
            Timeframe::M15 => "M15",
            Timeframe::M30 => "M30",
            Timeframe::H1 => "H1",
            Timeframe::H4 => "H4",
            Timeframe::D1 => "D1",
        };
        write!(f, "{s}")
    }
}

/// A breakout detected on the newest candle of a window.
///
/// Produced by the detector, consumed once by the trigger watcher and then
/// dropped. Never persisted across cycles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub direction: OrderSide,
    /// Retracement level inside the breakout candle at which entry is attempted.
    pub trigger_price: f64,
    /// Open time of the breakout candle.
    pub detected_at: DateTime<Utc>,
    pub candle_high: f64,
    pub candle_low: f64,
}

/// Broker-side open position, as last reported by the order gateway.
///
/// This is a view only: it is re-queried before every decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub direction: OrderSide,
    pub volume: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentKind {
    Open,
    Close,
    AdjustStop,
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntentKind::Open => write!(f, "OPEN"),
            IntentKind::Close => write!(f, "CLOSE"),
            IntentKind::AdjustStop => write!(f, "ADJUST_STOP"),
        }
    }
}

/// One-shot command for the order gateway. Never retried automatically.
///
/// `direction` is the direction of the position the intent opens, closes or
/// adjusts. `ticket` identifies the target position for CLOSE and ADJUST_STOP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub kind: IntentKind,
    pub symbol: String,
    pub direction: OrderSide,
    pub volume: f64,
    /// Reference price (trigger for OPEN, quote for CLOSE). Orders are market orders.
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub ticket: Option<u64>,
}

impl TradeIntent {
    pub fn open(
        symbol: impl Into<String>,
        direction: OrderSide,
        volume: f64,
        price: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Self {
        Self {
            kind: IntentKind::Open,
            symbol: symbol.into(),
            direction,
            volume,
            price,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            ticket: None,
        }
    }

    pub fn close(position: &Position, price: f64) -> Self {
        Self {
            kind: IntentKind::Close,
            symbol: position.symbol.clone(),
            direction: position.direction,
            volume: position.volume,
            price,
            stop_loss: None,
            take_profit: None,
            ticket: Some(position.ticket),
        }
    }

    /// Move the stop of `position` to `stop_loss`, keeping its take-profit.
    pub fn adjust_stop(position: &Position, stop_loss: f64) -> Self {
        Self {
            kind: IntentKind::AdjustStop,
            symbol: position.symbol.clone(),
            direction: position.direction,
            volume: position.volume,
            price: stop_loss,
            stop_loss: Some(stop_loss),
            take_profit: position.take_profit,
            ticket: Some(position.ticket),
        }
    }
}

/// Result reported by the order gateway for a single intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderOutcome {
    pub success: bool,
    pub ticket: Option<u64>,
    pub error_code: Option<i32>,
    pub message: Option<String>,
    pub fill_price: Option<f64>,
}

impl OrderOutcome {
    pub fn filled(ticket: u64, fill_price: f64) -> Self {
        Self {
            success: true,
            ticket: Some(ticket),
            error_code: None,
            message: None,
            fill_price: Some(fill_price),
        }
    }

    pub fn rejected(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            success: false,
            ticket: None,
            error_code: Some(error_code),
            message: Some(message.into()),
            fill_price: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote() -> Quote {
        Quote { bid: 99.5, ask: 100.5, time: Utc::now() }
    }

    #[test]
    fn buys_fill_on_ask_and_exit_on_bid() {
        let q = quote();
        assert_eq!(q.price_for(OrderSide::Buy), 100.5);
        assert_eq!(q.exit_price_for(OrderSide::Buy), 99.5);
        assert_eq!(q.exit_price_for(OrderSide::Sell), 100.5);
    }

    #[test]
    fn timeframe_parses_from_config_strings() {
        #[derive(Deserialize)]
        struct Wrapper {
            tf: Timeframe,
        }
        let w: Wrapper = toml::from_str("tf = \"H1\"").unwrap();
        assert_eq!(w.tf, Timeframe::H1);
        assert_eq!(w.tf.duration(), Duration::from_secs(3600));
    }
}
