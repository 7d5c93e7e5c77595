use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use common::{
    IntentKind, MarketDataGateway, OrderGateway, OrderOutcome, OrderSide, Position, Quote, Result,
    TradeIntent,
};

/// Broker return codes used for simulated refusals.
pub const RETCODE_INVALID_VOLUME: i32 = 10014;
pub const RETCODE_INVALID_STOPS: i32 = 10016;
pub const RETCODE_NO_QUOTES: i32 = 10021;
pub const RETCODE_POSITION_CLOSED: i32 = 10036;

/// Simulated broker account for paper trading.
///
/// Market orders fill at the live quote from the wrapped market data gateway
/// with configurable slippage. Stop-loss and take-profit levels are held
/// broker-side: positions whose level has been touched are closed the next
/// time open positions are queried. No real orders are ever sent.
pub struct PaperClient {
    market: Arc<dyn MarketDataGateway>,
    /// Open simulated positions, all symbols.
    positions: Arc<RwLock<Vec<Position>>>,
    next_ticket: AtomicU64,
    /// Slippage in basis points applied to all fills.
    slippage_bps: f64,
}

impl PaperClient {
    pub fn new(market: Arc<dyn MarketDataGateway>, slippage_bps: f64) -> Self {
        info!(slippage_bps, "PaperClient initialized");
        Self {
            market,
            positions: Arc::new(RwLock::new(Vec::new())),
            next_ticket: AtomicU64::new(1),
            slippage_bps,
        }
    }

    /// Apply slippage against the trader: buys pay more, sells receive less.
    fn slipped(&self, price: f64, side: OrderSide) -> f64 {
        match side {
            OrderSide::Buy => price * (1.0 + self.slippage_bps / 10_000.0),
            OrderSide::Sell => price * (1.0 - self.slippage_bps / 10_000.0),
        }
    }

    async fn quote(&self, symbol: &str) -> Result<Option<Quote>> {
        self.market.get_current_quote(symbol).await
    }

    async fn open(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
        if !(intent.volume > 0.0) {
            return Ok(OrderOutcome::rejected(RETCODE_INVALID_VOLUME, "invalid volume"));
        }
        let Some(quote) = self.quote(&intent.symbol).await? else {
            return Ok(OrderOutcome::rejected(RETCODE_NO_QUOTES, "no quotes"));
        };
        let fill_price = self.slipped(quote.price_for(intent.direction), intent.direction);

        if !stops_valid(intent.direction, fill_price, intent.stop_loss, intent.take_profit) {
            return Ok(OrderOutcome::rejected(RETCODE_INVALID_STOPS, "invalid stops"));
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        debug!(
            symbol = %intent.symbol,
            side = %intent.direction,
            quote_bid = quote.bid,
            quote_ask = quote.ask,
            fill = fill_price,
            ticket,
            "Paper open simulated"
        );
        self.positions.write().await.push(Position {
            ticket,
            symbol: intent.symbol.clone(),
            direction: intent.direction,
            volume: intent.volume,
            entry_price: fill_price,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            opened_at: Utc::now(),
        });
        Ok(OrderOutcome::filled(ticket, fill_price))
    }

    async fn close(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
        let Some(quote) = self.quote(&intent.symbol).await? else {
            return Ok(OrderOutcome::rejected(RETCODE_NO_QUOTES, "no quotes"));
        };
        let mut positions = self.positions.write().await;
        let Some(idx) = positions.iter().position(|p| Some(p.ticket) == intent.ticket) else {
            return Ok(OrderOutcome::rejected(RETCODE_POSITION_CLOSED, "position not found"));
        };
        let closed = positions.remove(idx);
        let exit_side = closed.direction.opposite();
        let fill_price = self.slipped(quote.price_for(exit_side), exit_side);
        debug!(symbol = %closed.symbol, ticket = closed.ticket, fill = fill_price, "Paper close simulated");
        Ok(OrderOutcome::filled(closed.ticket, fill_price))
    }

    async fn adjust(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
        let Some(quote) = self.quote(&intent.symbol).await? else {
            return Ok(OrderOutcome::rejected(RETCODE_NO_QUOTES, "no quotes"));
        };
        let mut positions = self.positions.write().await;
        let Some(pos) = positions.iter_mut().find(|p| Some(p.ticket) == intent.ticket) else {
            return Ok(OrderOutcome::rejected(RETCODE_POSITION_CLOSED, "position not found"));
        };
        let exit = quote.exit_price_for(pos.direction);
        if !stops_valid(pos.direction, exit, intent.stop_loss, intent.take_profit) {
            return Ok(OrderOutcome::rejected(RETCODE_INVALID_STOPS, "invalid stops"));
        }
        pos.stop_loss = intent.stop_loss;
        pos.take_profit = intent.take_profit;
        Ok(OrderOutcome::filled(pos.ticket, exit))
    }

    /// Close every position on `symbol` whose stop or target the quote has touched.
    async fn sweep_protective_levels(&self, symbol: &str) -> Result<()> {
        let Some(quote) = self.quote(symbol).await? else {
            return Ok(());
        };
        let mut positions = self.positions.write().await;
        positions.retain(|p| {
            if p.symbol != symbol {
                return true;
            }
            let exit = quote.exit_price_for(p.direction);
            let (stop_hit, target_hit) = match p.direction {
                OrderSide::Buy => (
                    p.stop_loss.is_some_and(|sl| exit <= sl),
                    p.take_profit.is_some_and(|tp| exit >= tp),
                ),
                OrderSide::Sell => (
                    p.stop_loss.is_some_and(|sl| exit >= sl),
                    p.take_profit.is_some_and(|tp| exit <= tp),
                ),
            };
            if stop_hit || target_hit {
                info!(
                    symbol = %p.symbol,
                    ticket = p.ticket,
                    price = exit,
                    reason = if stop_hit { "stop-loss" } else { "take-profit" },
                    "Paper position closed by protective level"
                );
            }
            !(stop_hit || target_hit)
        });
        Ok(())
    }
}

/// Stops must sit on the losing side of `price` and targets on the winning side.
fn stops_valid(side: OrderSide, price: f64, stop_loss: Option<f64>, take_profit: Option<f64>) -> bool {
    match side {
        OrderSide::Buy => {
            stop_loss.map_or(true, |sl| sl < price) && take_profit.map_or(true, |tp| tp > price)
        }
        OrderSide::Sell => {
            stop_loss.map_or(true, |sl| sl > price) && take_profit.map_or(true, |tp| tp < price)
        }
    }
}

#[async_trait]
impl OrderGateway for PaperClient {
    async fn get_open_positions(&self, symbol: &str) -> Result<Vec<Position>> {
        self.sweep_protective_levels(symbol).await?;
        Ok(self
            .positions
            .read()
            .await
            .iter()
            .filter(|p| p.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn submit_order(&self, intent: &TradeIntent) -> Result<OrderOutcome> {
        match intent.kind {
            IntentKind::Open => self.open(intent).await,
            IntentKind::Close => self.close(intent).await,
            IntentKind::AdjustStop => self.adjust(intent).await,
        }
    }
}
