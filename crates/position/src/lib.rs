pub mod decision;
pub mod manager;
pub mod trailing;

pub use decision::{decide, Decision, PositionParams};
pub use manager::{ApplyOutcome, PositionManager, TrailingOutcome};
pub use trailing::{evaluate_trailing, unrealized_profit, TrailingAction};
