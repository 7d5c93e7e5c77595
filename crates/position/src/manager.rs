use std::sync::Arc;

use tracing::{error, info, warn};

use common::{
    Error, EventSink, MarketDataGateway, OrderGateway, OrderOutcome, Position, Quote, Result,
    Signal, SymbolConfig, TradeEvent, TradeIntent,
};

use crate::decision::{decide, Decision, PositionParams};
use crate::trailing::{evaluate_trailing, TrailingAction};

/// What `apply` did with a triggered signal.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    Opened {
        ticket: Option<u64>,
        fill_price: Option<f64>,
    },
    Skipped {
        ticket: u64,
    },
    Reversed {
        closed: u64,
        ticket: Option<u64>,
        fill_price: Option<f64>,
    },
}

/// What one trailing-stop pass did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingOutcome {
    Flat,
    Held,
    Closed { ticket: u64 },
    StopMoved { ticket: u64, new_stop: f64 },
}

/// Owns every order decision for one symbol.
///
/// Holds no belief about the account: open positions and quotes are fetched
/// from the gateways for each decision. This is the ONLY component that calls
/// `OrderGateway::submit_order`, and it never retries a refused intent.
pub struct PositionManager {
    symbol: String,
    params: PositionParams,
    orders: Arc<dyn OrderGateway>,
    market: Arc<dyn MarketDataGateway>,
    sink: Arc<dyn EventSink>,
}

impl PositionManager {
    pub fn new(
        cfg: &SymbolConfig,
        orders: Arc<dyn OrderGateway>,
        market: Arc<dyn MarketDataGateway>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            params: PositionParams::from(cfg),
            orders,
            market,
            sink,
        }
    }

    /// The single open position for the symbol, freshly queried.
    ///
    /// More than one open position breaks the one-per-symbol invariant and is
    /// reported as `InconsistentState`.
    pub async fn current_position(&self) -> Result<Option<Position>> {
        let mut positions = self.orders.get_open_positions(&self.symbol).await?;
        match positions.len() {
            0 => Ok(None),
            1 => Ok(positions.pop()),
            n => {
                let detail = format!("{n} open positions reported, expected at most one");
                Err(self.inconsistent(detail).await)
            }
        }
    }

    /// Act on a signal whose trigger price has been reached.
    pub async fn apply(&self, signal: &Signal) -> Result<ApplyOutcome> {
        let existing = self.current_position().await?;

        match decide(&self.symbol, existing.as_ref(), signal, &self.params) {
            Decision::Skip { ticket } => {
                info!(
                    symbol = %self.symbol,
                    direction = %signal.direction,
                    ticket,
                    "Position already open in signal direction, skipping entry"
                );
                self.sink
                    .record(TradeEvent::EntrySkipped {
                        symbol: self.symbol.clone(),
                        direction: signal.direction,
                        ticket,
                    })
                    .await;
                Ok(ApplyOutcome::Skipped { ticket })
            }

            Decision::Open(intent) => {
                let outcome = self.submit(&intent).await?;
                Ok(ApplyOutcome::Opened {
                    ticket: outcome.ticket,
                    fill_price: outcome.fill_price,
                })
            }

            Decision::Reverse { close, open } => {
                info!(
                    symbol = %self.symbol,
                    ticket = close.ticket,
                    from = %close.direction,
                    to = %open.direction,
                    "Reversing position"
                );
                self.close(&close).await?;

                // The open only goes out once the account is confirmed flat.
                if let Some(still_open) = self.current_position().await? {
                    let detail = format!(
                        "position {} ({}) still open after close, new {} entry aborted",
                        still_open.ticket, still_open.direction, open.direction
                    );
                    return Err(self.inconsistent(detail).await);
                }

                let outcome = self.submit(&open).await?;
                Ok(ApplyOutcome::Reversed {
                    closed: close.ticket,
                    ticket: outcome.ticket,
                    fill_price: outcome.fill_price,
                })
            }
        }
    }

    /// Close `position` completely at the current quote.
    pub async fn close(&self, position: &Position) -> Result<OrderOutcome> {
        let Some(quote) = self.quote().await? else {
            let detail = format!("no quote to close position {}", position.ticket);
            warn!(symbol = %self.symbol, %detail, "Close skipped");
            self.sink
                .record(TradeEvent::DataUnavailable {
                    symbol: self.symbol.clone(),
                    detail: detail.clone(),
                })
                .await;
            return Err(Error::DataUnavailable(detail));
        };
        let intent = TradeIntent::close(position, quote.exit_price_for(position.direction));
        self.submit(&intent).await
    }

    /// One trailing-stop pass against fresh position and quote data.
    /// A missing quote skips the pass.
    pub async fn manage_open_position(&self) -> Result<TrailingOutcome> {
        let Some(position) = self.current_position().await? else {
            return Ok(TrailingOutcome::Flat);
        };
        let Some(quote) = self.quote().await? else {
            return Ok(TrailingOutcome::Held);
        };
        self.adjust_trailing_stop(&position, &quote).await
    }

    /// Close at the profit target, or ratchet the stop once profit passes the
    /// trailing trigger.
    pub async fn adjust_trailing_stop(
        &self,
        position: &Position,
        quote: &Quote,
    ) -> Result<TrailingOutcome> {
        match evaluate_trailing(position, quote, &self.params) {
            TrailingAction::Hold => Ok(TrailingOutcome::Held),

            TrailingAction::Close { profit } => {
                info!(symbol = %self.symbol, ticket = position.ticket, profit, "Profit target reached");
                let intent = TradeIntent::close(position, quote.exit_price_for(position.direction));
                self.submit(&intent).await?;
                Ok(TrailingOutcome::Closed {
                    ticket: position.ticket,
                })
            }

            TrailingAction::AdjustStop { new_stop, profit } => {
                let intent = TradeIntent::adjust_stop(position, new_stop);
                self.submit(&intent).await?;
                info!(
                    symbol = %self.symbol,
                    ticket = position.ticket,
                    old_stop = ?position.stop_loss,
                    new_stop,
                    profit,
                    "Trailing stop moved"
                );
                self.sink
                    .record(TradeEvent::StopAdjusted {
                        symbol: self.symbol.clone(),
                        ticket: position.ticket,
                        old_stop: position.stop_loss,
                        new_stop,
                        profit,
                    })
                    .await;
                Ok(TrailingOutcome::StopMoved {
                    ticket: position.ticket,
                    new_stop,
                })
            }
        }
    }

    async fn quote(&self) -> Result<Option<Quote>> {
        self.market.get_current_quote(&self.symbol).await
    }

    /// Submit one intent and report the result. A refusal becomes
    /// `Error::OrderRejected`; nothing is retried.
    async fn submit(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
        info!(
            symbol = %intent.symbol,
            kind = %intent.kind,
            direction = %intent.direction,
            volume = intent.volume,
            price = intent.price,
            stop_loss = ?intent.stop_loss,
            take_profit = ?intent.take_profit,
            "Submitting order"
        );
        self.sink
            .record(TradeEvent::OrderSubmitted {
                intent: intent.clone(),
            })
            .await;

        match self.orders.submit_order(intent).await {
            Ok(outcome) if outcome.success => {
                info!(
                    symbol = %intent.symbol,
                    kind = %intent.kind,
                    ticket = ?outcome.ticket,
                    fill_price = ?outcome.fill_price,
                    "Order accepted"
                );
                self.sink
                    .record(TradeEvent::OrderFilled {
                        intent: intent.clone(),
                        ticket: outcome.ticket,
                        fill_price: outcome.fill_price,
                    })
                    .await;
                Ok(outcome)
            }
            Ok(outcome) => {
                let message = outcome
                    .message
                    .clone()
                    .unwrap_or_else(|| "rejected by broker".to_string());
                warn!(
                    symbol = %intent.symbol,
                    kind = %intent.kind,
                    code = ?outcome.error_code,
                    %message,
                    "Order rejected"
                );
                self.sink
                    .record(TradeEvent::OrderRejected {
                        intent: intent.clone(),
                        error_code: outcome.error_code,
                        message: message.clone(),
                    })
                    .await;
                Err(Error::OrderRejected {
                    code: outcome.error_code,
                    message,
                })
            }
            Err(e) => {
                error!(symbol = %intent.symbol, kind = %intent.kind, error = %e, "Order submission failed");
                self.sink
                    .record(TradeEvent::OrderRejected {
                        intent: intent.clone(),
                        error_code: None,
                        message: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn inconsistent(&self, detail: String) -> Error {
        error!(symbol = %self.symbol, %detail, "Inconsistent position state");
        self.sink
            .record(TradeEvent::InconsistentState {
                symbol: self.symbol.clone(),
                detail: detail.clone(),
            })
            .await;
        Error::InconsistentState(detail)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;
    use common::{Candle, IntentKind, OrderSide, Timeframe};

    /// Broker double: records intents, applies them to an in-memory book.
    #[derive(Default)]
    struct MockBroker {
        positions: Mutex<Vec<Position>>,
        intents: Mutex<Vec<TradeIntent>>,
        /// When set, CLOSE is accepted but the position stays on the book.
        sticky_close: bool,
        reject_open: bool,
    }

    #[async_trait]
    impl OrderGateway for MockBroker {
        async fn get_open_positions(&self, symbol: &str) -> Result<Vec<Position>> {
            Ok(self
                .positions
                .lock()
                .unwrap()
                .iter()
                .filter(|p| p.symbol == symbol)
                .cloned()
                .collect())
        }

        async fn submit_order(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
            self.intents.lock().unwrap().push(intent.clone());
            let mut book = self.positions.lock().unwrap();
            match intent.kind {
                IntentKind::Open if self.reject_open => {
                    Ok(OrderOutcome::rejected(10019, "not enough money"))
                }
                IntentKind::Open => {
                    let ticket = 100 + book.len() as u64;
                    book.push(Position {
                        ticket,
                        symbol: intent.symbol.clone(),
                        direction: intent.direction,
                        volume: intent.volume,
                        entry_price: intent.price,
                        stop_loss: intent.stop_loss,
                        take_profit: intent.take_profit,
                        opened_at: Utc::now(),
                    });
                    Ok(OrderOutcome::filled(ticket, intent.price))
                }
                IntentKind::Close => {
                    if !self.sticky_close {
                        book.retain(|p| Some(p.ticket) != intent.ticket);
                    }
                    Ok(OrderOutcome::filled(intent.ticket.unwrap_or(0), intent.price))
                }
                IntentKind::AdjustStop => {
                    if let Some(p) = book.iter_mut().find(|p| Some(p.ticket) == intent.ticket) {
                        p.stop_loss = intent.stop_loss;
                    }
                    Ok(OrderOutcome::filled(intent.ticket.unwrap_or(0), intent.price))
                }
            }
        }
    }

    struct FixedQuote(Mutex<Option<Quote>>);

    #[async_trait]
    impl MarketDataGateway for FixedQuote {
        async fn get_recent_candles(&self, _: &str, _: Timeframe, _: usize) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn get_current_quote(&self, _: &str) -> Result<Option<Quote>> {
            Ok(*self.0.lock().unwrap())
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<TradeEvent>>);

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn record(&self, event: TradeEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn config() -> SymbolConfig {
        let mut cfg = SymbolConfig::new("BTCUSD", 0.1);
        cfg.stop_loss_distance = 15.0;
        cfg.take_profit_distance = 30.0;
        cfg.profit_target = 50.0;
        cfg.trailing_trigger = 10.0;
        cfg.trailing_adjustment = 2.0;
        cfg
    }

    fn quote(bid: f64, ask: f64) -> Quote {
        Quote { bid, ask, time: Utc::now() }
    }

    fn signal(direction: OrderSide, trigger_price: f64) -> Signal {
        Signal {
            direction,
            trigger_price,
            detected_at: Utc::now(),
            candle_high: trigger_price + 5.0,
            candle_low: trigger_price - 5.0,
        }
    }

    fn held(direction: OrderSide, stop_loss: Option<f64>) -> Position {
        Position {
            ticket: 1,
            symbol: "BTCUSD".into(),
            direction,
            volume: 0.1,
            entry_price: 100.0,
            stop_loss,
            take_profit: None,
            opened_at: Utc::now(),
        }
    }

    fn manager(
        broker: Arc<MockBroker>,
        q: Option<Quote>,
    ) -> (PositionManager, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let pm = PositionManager::new(
            &config(),
            broker,
            Arc::new(FixedQuote(Mutex::new(q))),
            sink.clone(),
        );
        (pm, sink)
    }

    #[tokio::test]
    async fn flat_account_opens_once_with_trigger_offsets() {
        let broker = Arc::new(MockBroker::default());
        let (pm, _sink) = manager(broker.clone(), Some(quote(100.0, 100.5)));

        let outcome = pm.apply(&signal(OrderSide::Buy, 102.0)).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Opened { ticket: Some(_), .. }));

        let intents = broker.intents.lock().unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Open);
        assert_eq!(intents[0].stop_loss, Some(102.0 - 15.0));
        assert_eq!(intents[0].take_profit, Some(102.0 + 30.0));
    }

    #[tokio::test]
    async fn same_direction_signal_does_not_pyramid() {
        let broker = Arc::new(MockBroker::default());
        broker.positions.lock().unwrap().push(held(OrderSide::Buy, None));
        let (pm, sink) = manager(broker.clone(), Some(quote(100.0, 100.5)));

        let outcome = pm.apply(&signal(OrderSide::Buy, 102.0)).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped { ticket: 1 });
        assert!(broker.intents.lock().unwrap().is_empty());
        assert!(matches!(
            sink.0.lock().unwrap()[0],
            TradeEvent::EntrySkipped { ticket: 1, .. }
        ));
    }

    #[tokio::test]
    async fn opposite_signal_closes_then_opens() {
        let broker = Arc::new(MockBroker::default());
        broker.positions.lock().unwrap().push(held(OrderSide::Buy, None));
        let (pm, _sink) = manager(broker.clone(), Some(quote(99.0, 99.5)));

        let outcome = pm.apply(&signal(OrderSide::Sell, 98.0)).await.unwrap();
        assert!(matches!(outcome, ApplyOutcome::Reversed { closed: 1, .. }));

        let intents = broker.intents.lock().unwrap();
        let kinds: Vec<_> = intents.iter().map(|i| (i.kind, i.direction)).collect();
        assert_eq!(
            kinds,
            vec![(IntentKind::Close, OrderSide::Buy), (IntentKind::Open, OrderSide::Sell)]
        );
        assert_eq!(intents[0].price, 99.0, "buy closes on the bid");
    }

    #[tokio::test]
    async fn reversal_aborts_when_close_does_not_clear() {
        let broker = Arc::new(MockBroker {
            sticky_close: true,
            ..MockBroker::default()
        });
        broker.positions.lock().unwrap().push(held(OrderSide::Buy, None));
        let (pm, sink) = manager(broker.clone(), Some(quote(99.0, 99.5)));

        let err = pm.apply(&signal(OrderSide::Sell, 98.0)).await.unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));

        let intents = broker.intents.lock().unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].kind, IntentKind::Close);
        assert!(sink
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TradeEvent::InconsistentState { .. })));
    }

    #[tokio::test]
    async fn reversal_without_quote_submits_nothing() {
        let broker = Arc::new(MockBroker::default());
        broker.positions.lock().unwrap().push(held(OrderSide::Buy, None));
        let (pm, _sink) = manager(broker.clone(), None);

        let err = pm.apply(&signal(OrderSide::Sell, 98.0)).await.unwrap_err();
        assert!(matches!(err, Error::DataUnavailable(_)));
        assert!(broker.intents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_open_surfaces_and_is_not_retried() {
        let broker = Arc::new(MockBroker {
            reject_open: true,
            ..MockBroker::default()
        });
        let (pm, sink) = manager(broker.clone(), Some(quote(100.0, 100.5)));

        let err = pm.apply(&signal(OrderSide::Buy, 102.0)).await.unwrap_err();
        assert!(matches!(err, Error::OrderRejected { code: Some(10019), .. }));
        assert_eq!(broker.intents.lock().unwrap().len(), 1);
        assert!(sink
            .0
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, TradeEvent::OrderRejected { .. })));
    }

    #[tokio::test]
    async fn more_than_one_position_is_inconsistent() {
        let broker = Arc::new(MockBroker::default());
        {
            let mut book = broker.positions.lock().unwrap();
            book.push(held(OrderSide::Buy, None));
            book.push(Position { ticket: 2, ..held(OrderSide::Buy, None) });
        }
        let (pm, _sink) = manager(broker.clone(), Some(quote(100.0, 100.5)));

        let err = pm.apply(&signal(OrderSide::Buy, 102.0)).await.unwrap_err();
        assert!(matches!(err, Error::InconsistentState(_)));
        assert!(broker.intents.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trailing_pass_ratchets_stop_in_favor() {
        let broker = Arc::new(MockBroker::default());
        broker.positions.lock().unwrap().push(held(OrderSide::Buy, Some(90.0)));
        let (pm, _sink) = manager(broker.clone(), Some(quote(102.0, 102.2)));

        // (102 - 100) * 0.1 * 100 = 20 >= 10
        let first = pm.manage_open_position().await.unwrap();
        assert_eq!(first, TrailingOutcome::StopMoved { ticket: 1, new_stop: 92.0 });
        let second = pm.manage_open_position().await.unwrap();
        assert_eq!(second, TrailingOutcome::StopMoved { ticket: 1, new_stop: 94.0 });

        assert_eq!(broker.positions.lock().unwrap()[0].stop_loss, Some(94.0));
    }

    #[tokio::test]
    async fn trailing_pass_closes_at_profit_target() {
        let broker = Arc::new(MockBroker::default());
        broker.positions.lock().unwrap().push(held(OrderSide::Sell, Some(110.0)));
        let (pm, _sink) = manager(broker.clone(), Some(quote(94.5, 95.0)));

        let outcome = pm.manage_open_position().await.unwrap();
        assert_eq!(outcome, TrailingOutcome::Closed { ticket: 1 });
        assert!(broker.positions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn trailing_pass_without_position_is_flat() {
        let broker = Arc::new(MockBroker::default());
        let (pm, _sink) = manager(broker, Some(quote(100.0, 100.5)));
        assert_eq!(pm.manage_open_position().await.unwrap(), TrailingOutcome::Flat);
    }
}
