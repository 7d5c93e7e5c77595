use serde::Serialize;

use common::{Candle, DirectionRule, OrderSide, RangeBaseline, Signal, SymbolConfig};

use crate::SignalDetector;

/// Tunables of the breakout rule. See [`SymbolConfig`] for defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakoutParams {
    pub history_window: usize,
    pub breakout_multiplier: f64,
    pub retracement_fraction: f64,
    pub direction_rule: DirectionRule,
    pub range_baseline: RangeBaseline,
}

impl From<&SymbolConfig> for BreakoutParams {
    fn from(cfg: &SymbolConfig) -> Self {
        Self {
            history_window: cfg.history_window,
            breakout_multiplier: cfg.breakout_multiplier,
            retracement_fraction: cfg.retracement_fraction,
            direction_rule: cfg.direction_rule,
            range_baseline: cfg.range_baseline,
        }
    }
}

/// The numbers behind one evaluation, kept for logging even when no signal fires.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DetectorReport {
    /// Baseline range of the history candles (mean or max per policy).
    pub avg_range: f64,
    pub last_range: f64,
    /// `breakout_multiplier * avg_range`.
    pub threshold: f64,
    pub signal: Option<Signal>,
}

/// Big-candle breakout with a retracement entry.
///
/// The newest candle of a `W + 1` window is a breakout when its high-low range
/// is at least `k` times the baseline range of the `W` candles before it. The
/// trigger sits `retracement_fraction` of the range back from the extreme the
/// trade is entered toward: above the low for a BUY, below the high for a SELL.
/// A flat history (baseline range of zero) never signals.
#[derive(Debug, Clone)]
pub struct BreakoutDetector {
    params: BreakoutParams,
}

impl BreakoutDetector {
    pub fn new(params: BreakoutParams) -> Self {
        Self { params }
    }

    fn baseline(&self, history: &[Candle]) -> f64 {
        let ranges = history.iter().map(Candle::range);
        match self.params.range_baseline {
            RangeBaseline::Mean => ranges.sum::<f64>() / history.len() as f64,
            RangeBaseline::Max => ranges.fold(0.0, f64::max),
        }
    }

    fn direction(&self, window: &[Candle]) -> OrderSide {
        let reference = match self.params.direction_rule {
            DirectionRule::LastCandle => &window[window.len() - 1],
            DirectionRule::PreviousCandle => &window[window.len() - 2],
        };
        if reference.is_bullish() {
            OrderSide::Buy
        } else {
            OrderSide::Sell
        }
    }
}

impl SignalDetector for BreakoutDetector {
    fn name(&self) -> &str {
        "breakout-retracement"
    }

    fn window_len(&self) -> usize {
        self.params.history_window + 1
    }

    fn evaluate(&self, window: &[Candle]) -> Option<DetectorReport> {
        let needed = self.window_len();
        if self.params.history_window == 0 || window.len() < needed {
            return None;
        }
        // Only the newest W + 1 candles count.
        let window = &window[window.len() - needed..];
        let (history, last) = window.split_at(self.params.history_window);
        let last = &last[0];

        let avg_range = self.baseline(history);
        let last_range = last.range();
        let threshold = self.params.breakout_multiplier * avg_range;

        let is_breakout = avg_range.is_finite()
            && avg_range > 0.0
            && last_range > 0.0
            && last_range >= threshold;

        let signal = is_breakout.then(|| {
            let direction = self.direction(window);
            let retrace = self.params.retracement_fraction * last_range;
            let trigger_price = match direction {
                OrderSide::Buy => last.low + retrace,
                OrderSide::Sell => last.high - retrace,
            };
            Signal {
                direction,
                trigger_price,
                detected_at: last.open_time,
                candle_high: last.high,
                candle_low: last.low,
            }
        });

        Some(DetectorReport {
            avg_range,
            last_range,
            threshold,
            signal,
        })
    }
}
