use common::{OrderSide, Position, Signal, SymbolConfig, TradeIntent};

/// Order sizing and exit parameters for one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionParams {
    pub volume: f64,
    pub stop_loss_distance: f64,
    pub take_profit_distance: f64,
    pub profit_target: f64,
    pub trailing_trigger: f64,
    pub trailing_adjustment: f64,
    pub contract_size: f64,
}

impl From<&SymbolConfig> for PositionParams {
    fn from(cfg: &SymbolConfig) -> Self {
        Self {
            volume: cfg.volume,
            stop_loss_distance: cfg.stop_loss_distance,
            take_profit_distance: cfg.take_profit_distance,
            profit_target: cfg.profit_target,
            trailing_trigger: cfg.trailing_trigger,
            trailing_adjustment: cfg.trailing_adjustment,
            contract_size: cfg.contract_size,
        }
    }
}

/// What a triggered signal should do given the position currently held.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Flat: open a new position.
    Open(TradeIntent),
    /// Already positioned in the signal's direction. No pyramiding.
    Skip { ticket: u64 },
    /// Positioned against the signal: close `close` completely, confirm the
    /// account is flat, then submit `open`.
    Reverse { close: Position, open: TradeIntent },
}

/// Reconcile a triggered signal against the existing position.
///
/// Stop-loss and take-profit are fixed offsets from the trigger price.
pub fn decide(
    symbol: &str,
    existing: Option<&Position>,
    signal: &Signal,
    params: &PositionParams,
) -> Decision {
    let open = open_intent(symbol, signal, params);
    match existing {
        None => Decision::Open(open),
        Some(pos) if pos.direction == signal.direction => Decision::Skip { ticket: pos.ticket },
        Some(pos) => Decision::Reverse {
            close: pos.clone(),
            open,
        },
    }
}

fn open_intent(symbol: &str, signal: &Signal, params: &PositionParams) -> TradeIntent {
    let entry = signal.trigger_price;
    let (stop_loss, take_profit) = match signal.direction {
        OrderSide::Buy => (
            entry - params.stop_loss_distance,
            entry + params.take_profit_distance,
        ),
        OrderSide::Sell => (
            entry + params.stop_loss_distance,
            entry - params.take_profit_distance,
        ),
    };
    TradeIntent::open(symbol, signal.direction, params.volume, entry, stop_loss, take_profit)
}
