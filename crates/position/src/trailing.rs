use common::{OrderSide, Position, Quote};

use crate::PositionParams;

/// Outcome of one trailing-stop evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrailingAction {
    Hold,
    /// Profit target reached.
    Close { profit: f64 },
    /// Move the stop to `new_stop`, always in the position's favor.
    AdjustStop { new_stop: f64, profit: f64 },
}

/// Unrealized profit in account currency at the price the position would
/// exit on right now.
pub fn unrealized_profit(position: &Position, quote: &Quote, contract_size: f64) -> f64 {
    let exit = quote.exit_price_for(position.direction);
    let delta = match position.direction {
        OrderSide::Buy => exit - position.entry_price,
        OrderSide::Sell => position.entry_price - exit,
    };
    delta * position.volume * contract_size
}

/// Decide whether to close, trail the stop, or leave the position alone.
///
/// A position without a broker-side stop trails from its initial stop
/// distance below (BUY) or above (SELL) the entry. A stop that would land on
/// the wrong side of the current exit price is held back.
pub fn evaluate_trailing(position: &Position, quote: &Quote, params: &PositionParams) -> TrailingAction {
    let profit = unrealized_profit(position, quote, params.contract_size);
    if !profit.is_finite() {
        return TrailingAction::Hold;
    }

    if profit >= params.profit_target {
        return TrailingAction::Close { profit };
    }
    if profit < params.trailing_trigger || params.trailing_adjustment <= 0.0 {
        return TrailingAction::Hold;
    }

    let exit = quote.exit_price_for(position.direction);
    let new_stop = match position.direction {
        OrderSide::Buy => {
            let base = position
                .stop_loss
                .unwrap_or(position.entry_price - params.stop_loss_distance);
            base + params.trailing_adjustment
        }
        OrderSide::Sell => {
            let base = position
                .stop_loss
                .unwrap_or(position.entry_price + params.stop_loss_distance);
            base - params.trailing_adjustment
        }
    };

    let behind_price = match position.direction {
        OrderSide::Buy => new_stop < exit,
        OrderSide::Sell => new_stop > exit,
    };
    if behind_price {
        TrailingAction::AdjustStop { new_stop, profit }
    } else {
        TrailingAction::Hold
    }
}
