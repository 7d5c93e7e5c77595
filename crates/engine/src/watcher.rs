use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use common::{
    EventSink, MarketDataGateway, OrderSide, Quote, Result, Signal, SymbolConfig, TradeEvent,
};
use position::PositionManager;

use crate::shutdown::Shutdown;

/// How a watch over one signal ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WatchOutcome {
    /// Price reached the trigger. `price` is the quote side the entry fills on.
    Triggered { price: f64, samples: u32 },
    /// The signal went stale before price came back to the trigger.
    Expired { waited: Duration },
    Cancelled,
}

/// A BUY waits for the ask to fall to the trigger, a SELL for the bid to rise
/// to it: the entry is a retracement into the breakout candle.
pub fn trigger_reached(signal: &Signal, quote: &Quote) -> bool {
    let price = quote.price_for(signal.direction);
    match signal.direction {
        OrderSide::Buy => price <= signal.trigger_price,
        OrderSide::Sell => price >= signal.trigger_price,
    }
}

/// One trailing-stop pass. Recoverable failures are logged and skipped;
/// fatal ones are returned so the loop can hand them to its supervisor.
pub(crate) async fn trailing_pass(symbol: &str, positions: &PositionManager) -> Result<()> {
    match positions.manage_open_position().await {
        Ok(_) => Ok(()),
        Err(e) if e.is_fatal() => {
            error!(symbol, error = %e, "Trailing stop pass hit a fatal error");
            Err(e)
        }
        Err(e) => {
            warn!(symbol, error = %e, "Trailing stop pass failed");
            Ok(())
        }
    }
}

/// Polls the quote for one symbol until a signal's trigger price is reached.
pub struct TriggerWatcher {
    symbol: String,
    market: Arc<dyn MarketDataGateway>,
    sink: Arc<dyn EventSink>,
    poll_interval: Duration,
    max_wait: Duration,
}

impl TriggerWatcher {
    pub fn new(
        cfg: &SymbolConfig,
        market: Arc<dyn MarketDataGateway>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            market,
            sink,
            poll_interval: cfg.poll_interval(),
            max_wait: cfg.max_watch(),
        }
    }

    /// Sample the quote every poll interval until the trigger is reached, the
    /// watch expires, or shutdown fires. Missing quotes and recoverable fetch
    /// errors skip the sample; fatal errors end the watch. While waiting,
    /// `positions` gets a trailing-stop pass on every tick that does not trigger.
    pub async fn watch(
        &self,
        signal: &Signal,
        shutdown: &mut Shutdown,
        positions: Option<&PositionManager>,
    ) -> Result<WatchOutcome> {
        info!(
            symbol = %self.symbol,
            direction = %signal.direction,
            trigger = signal.trigger_price,
            poll_ms = self.poll_interval.as_millis() as u64,
            "Monitoring for entry at trigger price"
        );
        self.sink
            .record(TradeEvent::WatchStarted {
                symbol: self.symbol.clone(),
                direction: signal.direction,
                trigger_price: signal.trigger_price,
            })
            .await;

        let started = Instant::now();
        let deadline = started + self.max_wait;
        let mut samples = 0u32;

        loop {
            if shutdown.is_triggered() {
                return Ok(self.cancelled().await);
            }

            samples += 1;
            match self.market.get_current_quote(&self.symbol).await {
                Ok(Some(quote)) if trigger_reached(signal, &quote) => {
                    let price = quote.price_for(signal.direction);
                    info!(
                        symbol = %self.symbol,
                        direction = %signal.direction,
                        trigger = signal.trigger_price,
                        price,
                        samples,
                        "Entry triggered"
                    );
                    self.sink
                        .record(TradeEvent::TriggerHit {
                            symbol: self.symbol.clone(),
                            direction: signal.direction,
                            trigger_price: signal.trigger_price,
                            price,
                        })
                        .await;
                    return Ok(WatchOutcome::Triggered { price, samples });
                }
                Ok(Some(_)) => {}
                Ok(None) => debug!(symbol = %self.symbol, "No quote available, skipping sample"),
                Err(e) if e.is_fatal() => {
                    error!(symbol = %self.symbol, error = %e, "Quote fetch failed, abandoning watch");
                    return Err(e);
                }
                Err(e) => warn!(symbol = %self.symbol, error = %e, "Quote fetch failed, skipping sample"),
            }

            if let Some(pm) = positions {
                trailing_pass(&self.symbol, pm).await?;
            }

            if Instant::now() >= deadline {
                let waited = started.elapsed();
                info!(
                    symbol = %self.symbol,
                    trigger = signal.trigger_price,
                    waited_secs = waited.as_secs(),
                    "Trigger not reached, abandoning signal"
                );
                self.sink
                    .record(TradeEvent::WatchExpired {
                        symbol: self.symbol.clone(),
                        direction: signal.direction,
                        trigger_price: signal.trigger_price,
                        waited_secs: waited.as_secs(),
                    })
                    .await;
                return Ok(WatchOutcome::Expired { waited });
            }

            if !shutdown.sleep(self.poll_interval).await {
                return Ok(self.cancelled().await);
            }
        }
    }

    async fn cancelled(&self) -> WatchOutcome {
        info!(symbol = %self.symbol, "Watch cancelled by shutdown");
        self.sink
            .record(TradeEvent::WatchCancelled {
                symbol: self.symbol.clone(),
            })
            .await;
        WatchOutcome::Cancelled
    }
}
