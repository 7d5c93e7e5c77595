use chrono::Utc;
use proptest::prelude::*;

use common::{OrderSide, Position, Quote};
use position::{decide, evaluate_trailing, Decision, PositionParams, TrailingAction};

fn params(trigger: f64, adjustment: f64) -> PositionParams {
    PositionParams {
        volume: 0.5,
        stop_loss_distance: 15.0,
        take_profit_distance: 15.0,
        profit_target: 1_000_000.0,
        trailing_trigger: trigger,
        trailing_adjustment: adjustment,
        contract_size: 1.0,
    }
}

fn side() -> impl Strategy<Value = OrderSide> {
    prop_oneof![Just(OrderSide::Buy), Just(OrderSide::Sell)]
}

proptest! {
    /// Replaying a random price path through the trailing rule never moves a
    /// BUY stop down or a SELL stop up, and never puts it past the exit price.
    #[test]
    fn trailing_stop_is_monotonic(
        direction in side(),
        entry in 100.0f64..50_000.0,
        moves in prop::collection::vec(-50.0f64..50.0, 1..60),
        trigger in 0.0f64..20.0,
        adjustment in 0.01f64..10.0,
    ) {
        let p = params(trigger, adjustment);
        let mut position = Position {
            ticket: 1,
            symbol: "BTCUSD".into(),
            direction,
            volume: 0.5,
            entry_price: entry,
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
        };

        let mut price = entry;
        for step in moves {
            price = (price + step).max(1.0);
            let quote = Quote { bid: price, ask: price, time: Utc::now() };

            if let TrailingAction::AdjustStop { new_stop, .. } = evaluate_trailing(&position, &quote, &p) {
                if let Some(old) = position.stop_loss {
                    match direction {
                        OrderSide::Buy => prop_assert!(new_stop >= old),
                        OrderSide::Sell => prop_assert!(new_stop <= old),
                    }
                }
                match direction {
                    OrderSide::Buy => prop_assert!(new_stop < price),
                    OrderSide::Sell => prop_assert!(new_stop > price),
                }
                position.stop_loss = Some(new_stop);
            }
        }
    }

    /// A held position in the signal's direction never yields a new OPEN.
    #[test]
    fn no_open_while_same_direction_is_held(
        direction in side(),
        trigger_price in 1.0f64..100_000.0,
    ) {
        let held = Position {
            ticket: 9,
            symbol: "ETHUSD".into(),
            direction,
            volume: 0.5,
            entry_price: trigger_price,
            stop_loss: None,
            take_profit: None,
            opened_at: Utc::now(),
        };
        let signal = common::Signal {
            direction,
            trigger_price,
            detected_at: Utc::now(),
            candle_high: trigger_price + 1.0,
            candle_low: trigger_price - 1.0,
        };

        let decision = decide("ETHUSD", Some(&held), &signal, &params(10.0, 2.0));
        prop_assert_eq!(decision, Decision::Skip { ticket: 9 });
    }
}
