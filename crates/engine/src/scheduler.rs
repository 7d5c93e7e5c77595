use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::info;

use common::{Candle, Result, SymbolConfig, Timeframe};
use position::PositionManager;

use crate::shutdown::Shutdown;
use crate::watcher::trailing_pass;

/// First multiple of `interval` since the Unix epoch strictly after `now`.
///
/// With a one-minute interval this is the top of the next minute; with
/// fifteen minutes it is the next quarter hour, and so on.
pub fn next_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let next = (now.timestamp().div_euclid(step) + 1) * step;
    DateTime::<Utc>::from_timestamp(next, 0).unwrap_or(now)
}

/// Last multiple of `interval` since the Unix epoch at or before `now`.
pub fn current_boundary(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.as_secs().max(1) as i64;
    let last = now.timestamp().div_euclid(step) * step;
    DateTime::<Utc>::from_timestamp(last, 0).unwrap_or(now)
}

/// Boundary the next cycle belongs to. After a cycle run for `last` this is
/// the boundary following it, which is already in the past when that
/// cycle's watch outlived the interval.
pub fn next_cycle_boundary(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval: Duration,
) -> DateTime<Utc> {
    match last {
        Some(prev) => next_boundary(prev, interval),
        None => next_boundary(now, interval),
    }
}

/// The newest `needed` closed candles of `candles` (oldest first).
///
/// A trailing candle whose period has not ended at `now` is still forming
/// and is dropped before the window is cut.
pub fn closed_window(
    candles: &[Candle],
    timeframe: Timeframe,
    now: DateTime<Utc>,
    needed: usize,
) -> Vec<Candle> {
    let period = chrono::Duration::from_std(timeframe.duration()).unwrap_or(chrono::Duration::zero());
    let closed = match candles.last() {
        Some(last) if last.open_time + period > now => &candles[..candles.len() - 1],
        _ => candles,
    };
    let start = closed.len().saturating_sub(needed);
    closed[start..].to_vec()
}

/// Paces one symbol's detection cycles on interval boundaries.
pub struct CycleScheduler {
    symbol: String,
    interval: Duration,
    poll_interval: Duration,
}

impl CycleScheduler {
    pub fn new(cfg: &SymbolConfig) -> Self {
        Self {
            symbol: cfg.symbol.clone(),
            interval: cfg.interval(),
            poll_interval: cfg.poll_interval(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep until the boundary after `last` (the boundary of the previous
    /// cycle, `None` before the first) so the cycle evaluates a just-closed
    /// candle. If that boundary already passed, return at once with the most
    /// recent one. While waiting, `positions` gets a trailing-stop pass every
    /// poll interval.
    ///
    /// Returns the boundary the cycle runs for, or `None` if shutdown fired.
    /// Fatal errors from a trailing pass are returned.
    pub async fn wait_for_next_cycle(
        &self,
        last: Option<DateTime<Utc>>,
        shutdown: &mut Shutdown,
        positions: Option<&PositionManager>,
    ) -> Result<Option<DateTime<Utc>>> {
        let now = Utc::now();
        let boundary = next_cycle_boundary(last, now, self.interval);
        if boundary <= now {
            let latest = current_boundary(now, self.interval);
            info!(symbol = %self.symbol, missed = %boundary, run_for = %latest, "Boundary already passed, running cycle now");
            return Ok((!shutdown.is_triggered()).then_some(latest));
        }
        info!(symbol = %self.symbol, next_run = %boundary, "Waiting for next interval");

        loop {
            let remaining = match (boundary - Utc::now()).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => return Ok((!shutdown.is_triggered()).then_some(boundary)),
            };
            if !shutdown.sleep(remaining.min(self.poll_interval)).await {
                return Ok(None);
            }
            if let Some(pm) = positions {
                if Utc::now() < boundary {
                    trailing_pass(&self.symbol, pm).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::shutdown;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, h, m, s).unwrap()
    }

    fn candle(open_time: DateTime<Utc>) -> Candle {
        Candle { open_time, open: 1.0, high: 2.0, low: 0.5, close: 1.5 }
    }

    #[test]
    fn boundary_is_top_of_next_minute() {
        assert_eq!(next_boundary(at(10, 15, 42), Duration::from_secs(60)), at(10, 16, 0));
    }

    #[test]
    fn boundary_exactly_on_mark_moves_forward() {
        assert_eq!(next_boundary(at(10, 15, 0), Duration::from_secs(60)), at(10, 16, 0));
    }

    #[test]
    fn multi_minute_boundary_rolls_over_the_hour() {
        assert_eq!(next_boundary(at(10, 58, 10), Duration::from_secs(5 * 60)), at(11, 0, 0));
        assert_eq!(next_boundary(at(23, 59, 59), Duration::from_secs(15 * 60)), at(0, 0, 0) + chrono::Duration::days(1));
    }

    #[test]
    fn forming_candle_is_dropped() {
        let candles: Vec<Candle> = (0..8).map(|i| candle(at(10, i, 0))).collect();
        // At 10:07:30 the 10:07 candle is still open.
        let window = closed_window(&candles, Timeframe::M1, at(10, 7, 30), 6);
        assert_eq!(window.len(), 6);
        assert_eq!(window.first().unwrap().open_time, at(10, 1, 0));
        assert_eq!(window.last().unwrap().open_time, at(10, 6, 0));
    }

    #[test]
    fn closed_candles_are_kept() {
        let candles: Vec<Candle> = (0..7).map(|i| candle(at(10, i, 0))).collect();
        let window = closed_window(&candles, Timeframe::M1, at(10, 8, 0), 6);
        assert_eq!(window.last().unwrap().open_time, at(10, 6, 0));
        assert_eq!(window.first().unwrap().open_time, at(10, 1, 0));
    }

    #[test]
    fn short_history_yields_short_window() {
        let candles: Vec<Candle> = (0..3).map(|i| candle(at(10, i, 0))).collect();
        assert_eq!(closed_window(&candles, Timeframe::M1, at(11, 0, 0), 6).len(), 3);
    }

    #[test]
    fn current_boundary_floors_to_interval() {
        assert_eq!(current_boundary(at(10, 15, 42), Duration::from_secs(60)), at(10, 15, 0));
        assert_eq!(current_boundary(at(10, 15, 0), Duration::from_secs(60)), at(10, 15, 0));
        assert_eq!(current_boundary(at(10, 14, 59), Duration::from_secs(5 * 60)), at(10, 10, 0));
    }

    #[test]
    fn cycle_after_expired_watch_belongs_to_following_boundary() {
        let minute = Duration::from_secs(60);
        // Cycle ran for 10:00 and its watch expired a minute later, past 10:01.
        let next = next_cycle_boundary(Some(at(10, 0, 0)), at(10, 1, 0) + chrono::Duration::milliseconds(300), minute);
        assert_eq!(next, at(10, 1, 0));
        // First cycle waits for the upcoming boundary.
        assert_eq!(next_cycle_boundary(None, at(10, 0, 20), minute), at(10, 1, 0));
    }

    #[tokio::test]
    async fn passed_boundary_runs_without_waiting() {
        let scheduler = CycleScheduler::new(&SymbolConfig::new("EURUSD", 0.03));
        let (_trigger, mut token) = shutdown::channel();
        let interval = scheduler.interval();
        let previous = current_boundary(Utc::now(), interval) - chrono::Duration::minutes(1);

        let ran_for = tokio::time::timeout(
            Duration::from_secs(1),
            scheduler.wait_for_next_cycle(Some(previous), &mut token, None),
        )
        .await
        .expect("cycle should start immediately")
        .unwrap()
        .unwrap();

        assert!(ran_for > previous);
        assert!(ran_for <= Utc::now());
    }

    #[tokio::test]
    async fn wait_returns_none_once_shutdown_fired() {
        let scheduler = CycleScheduler::new(&SymbolConfig::new("EURUSD", 0.03));
        let (trigger, mut token) = shutdown::channel();
        trigger.trigger();
        assert_eq!(scheduler.wait_for_next_cycle(None, &mut token, None).await.unwrap(), None);
    }
}
