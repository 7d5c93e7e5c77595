use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{OrderSide, Signal, TradeIntent};

/// Every decision a symbol loop takes, as reported to the event sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeEvent {
    SignalDetected {
        symbol: String,
        signal: Signal,
        avg_range: f64,
        last_range: f64,
    },
    WatchStarted {
        symbol: String,
        direction: OrderSide,
        trigger_price: f64,
    },
    TriggerHit {
        symbol: String,
        direction: OrderSide,
        trigger_price: f64,
        price: f64,
    },
    WatchExpired {
        symbol: String,
        direction: OrderSide,
        trigger_price: f64,
        waited_secs: u64,
    },
    WatchCancelled {
        symbol: String,
    },
    OrderSubmitted {
        intent: TradeIntent,
    },
    OrderFilled {
        intent: TradeIntent,
        ticket: Option<u64>,
        fill_price: Option<f64>,
    },
    OrderRejected {
        intent: TradeIntent,
        error_code: Option<i32>,
        message: String,
    },
    EntrySkipped {
        symbol: String,
        direction: OrderSide,
        ticket: u64,
    },
    StopAdjusted {
        symbol: String,
        ticket: u64,
        old_stop: Option<f64>,
        new_stop: f64,
        profit: f64,
    },
    InconsistentState {
        symbol: String,
        detail: String,
    },
    DataUnavailable {
        symbol: String,
        detail: String,
    },
}

impl TradeEvent {
    pub fn symbol(&self) -> &str {
        match self {
            TradeEvent::SignalDetected { symbol, .. }
            | TradeEvent::WatchStarted { symbol, .. }
            | TradeEvent::TriggerHit { symbol, .. }
            | TradeEvent::WatchExpired { symbol, .. }
            | TradeEvent::WatchCancelled { symbol }
            | TradeEvent::EntrySkipped { symbol, .. }
            | TradeEvent::StopAdjusted { symbol, .. }
            | TradeEvent::InconsistentState { symbol, .. }
            | TradeEvent::DataUnavailable { symbol, .. } => symbol,
            TradeEvent::OrderSubmitted { intent }
            | TradeEvent::OrderFilled { intent, .. }
            | TradeEvent::OrderRejected { intent, .. } => &intent.symbol,
        }
    }

    /// Stable name used as the journal's event kind column.
    pub fn kind(&self) -> &'static str {
        match self {
            TradeEvent::SignalDetected { .. } => "signal_detected",
            TradeEvent::WatchStarted { .. } => "watch_started",
            TradeEvent::TriggerHit { .. } => "trigger_hit",
            TradeEvent::WatchExpired { .. } => "watch_expired",
            TradeEvent::WatchCancelled { .. } => "watch_cancelled",
            TradeEvent::OrderSubmitted { .. } => "order_submitted",
            TradeEvent::OrderFilled { .. } => "order_filled",
            TradeEvent::OrderRejected { .. } => "order_rejected",
            TradeEvent::EntrySkipped { .. } => "entry_skipped",
            TradeEvent::StopAdjusted { .. } => "stop_adjusted",
            TradeEvent::InconsistentState { .. } => "inconsistent_state",
            TradeEvent::DataUnavailable { .. } => "data_unavailable",
        }
    }
}

/// Side-effecting sink for trade events (journal, log, alerting).
///
/// Recording never fails from the caller's point of view: a sink that
/// cannot persist an event logs the failure itself.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: TradeEvent);
}
