pub mod breakout;

pub use breakout::{BreakoutDetector, BreakoutParams, DetectorReport};

use common::{Candle, Signal};

/// Signal rules evaluated once per closed candle.
///
/// Implementations are pure: the same window always yields the same report,
/// and no gateway is consulted.
pub trait SignalDetector: Send + Sync {
    /// Human-readable name of the rule, for logs.
    fn name(&self) -> &str;

    /// Number of closed candles (oldest first) the rule needs per evaluation.
    fn window_len(&self) -> usize;

    /// Evaluate the window. Returns `None` when the window is too short to judge.
    fn evaluate(&self, window: &[Candle]) -> Option<DetectorReport>;

    /// Shorthand for the signal part of [`SignalDetector::evaluate`].
    fn detect(&self, window: &[Candle]) -> Option<Signal> {
        self.evaluate(window).and_then(|report| report.signal)
    }
}
