use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use common::{
    Error, EventSink, MarketDataGateway, OrderGateway, Result, SymbolConfig, TradeEvent,
};
use position::{ApplyOutcome, PositionManager};
use strategy::{BreakoutDetector, BreakoutParams, SignalDetector};

use crate::scheduler::{closed_window, CycleScheduler};
use crate::shutdown::Shutdown;
use crate::watcher::{TriggerWatcher, WatchOutcome};

/// The collaborators one symbol loop talks to. Cheap to clone; several loops
/// may share the same gateways.
#[derive(Clone)]
pub struct Gateways {
    pub market: Arc<dyn MarketDataGateway>,
    pub orders: Arc<dyn OrderGateway>,
    pub sink: Arc<dyn EventSink>,
}

/// How one detection cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Candles could not be fetched; the cycle was skipped.
    NoData,
    NoSignal,
    /// A signal was found but price never came back to the trigger.
    Expired,
    Cancelled,
    Acted(ApplyOutcome),
}

/// Drives the detect, watch, act cycle for a single symbol.
pub struct SymbolRunner {
    cfg: SymbolConfig,
    detector: Box<dyn SignalDetector>,
    scheduler: CycleScheduler,
    watcher: TriggerWatcher,
    positions: PositionManager,
    market: Arc<dyn MarketDataGateway>,
    sink: Arc<dyn EventSink>,
}

impl SymbolRunner {
    pub fn new(cfg: SymbolConfig, gateways: Gateways) -> Self {
        let detector = Box::new(BreakoutDetector::new(BreakoutParams::from(&cfg)));
        let scheduler = CycleScheduler::new(&cfg);
        let watcher = TriggerWatcher::new(&cfg, gateways.market.clone(), gateways.sink.clone());
        let positions = PositionManager::new(
            &cfg,
            gateways.orders,
            gateways.market.clone(),
            gateways.sink.clone(),
        );
        Self {
            cfg,
            detector,
            scheduler,
            watcher,
            positions,
            market: gateways.market,
            sink: gateways.sink,
        }
    }

    /// Loop until shutdown, one cycle per interval boundary. A cycle whose
    /// watch ran past the next boundary is followed immediately by the next
    /// one. Recoverable errors end the cycle and the loop continues; fatal
    /// errors are returned.
    pub async fn run(&self, mut shutdown: Shutdown) -> Result<()> {
        info!(
            symbol = %self.cfg.symbol,
            detector = self.detector.name(),
            timeframe = %self.cfg.timeframe,
            interval_secs = self.scheduler.interval().as_secs(),
            "Symbol loop started"
        );

        let mut last_boundary = None;
        loop {
            let Some(boundary) = self
                .scheduler
                .wait_for_next_cycle(last_boundary, &mut shutdown, Some(&self.positions))
                .await?
            else {
                break;
            };
            last_boundary = Some(boundary);

            match self.run_cycle(&mut shutdown).await {
                Ok(CycleOutcome::Cancelled) => break,
                Ok(outcome) => debug!(symbol = %self.cfg.symbol, ?outcome, "Cycle finished"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(symbol = %self.cfg.symbol, error = %e, "Cycle aborted"),
            }
        }

        info!(symbol = %self.cfg.symbol, "Symbol loop stopped");
        Ok(())
    }

    pub async fn run_cycle(&self, shutdown: &mut Shutdown) -> Result<CycleOutcome> {
        self.run_cycle_at(Utc::now(), shutdown).await
    }

    /// One cycle evaluated against the candles closed at `now`.
    pub async fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        shutdown: &mut Shutdown,
    ) -> Result<CycleOutcome> {
        let symbol = &self.cfg.symbol;
        let needed = self.detector.window_len();

        // One extra candle in case the newest one is still forming.
        let candles = match self
            .market
            .get_recent_candles(symbol, self.cfg.timeframe, needed + 1)
            .await
        {
            Ok(candles) => candles,
            Err(Error::DataUnavailable(detail)) => {
                warn!(symbol = %symbol, %detail, "Candles unavailable, skipping cycle");
                self.sink
                    .record(TradeEvent::DataUnavailable {
                        symbol: symbol.clone(),
                        detail,
                    })
                    .await;
                return Ok(CycleOutcome::NoData);
            }
            Err(e) => return Err(e),
        };

        let window = closed_window(&candles, self.cfg.timeframe, now, needed);
        let Some(report) = self.detector.evaluate(&window) else {
            warn!(
                symbol = %symbol,
                have = window.len(),
                needed,
                "Not enough closed candles to evaluate"
            );
            return Ok(CycleOutcome::NoSignal);
        };

        let Some(signal) = report.signal else {
            debug!(
                symbol = %symbol,
                avg_range = report.avg_range,
                last_range = report.last_range,
                threshold = report.threshold,
                "No breakout"
            );
            return Ok(CycleOutcome::NoSignal);
        };

        info!(
            symbol = %symbol,
            direction = %signal.direction,
            trigger = signal.trigger_price,
            avg_range = report.avg_range,
            last_range = report.last_range,
            candle_high = signal.candle_high,
            candle_low = signal.candle_low,
            "Breakout detected"
        );
        self.sink
            .record(TradeEvent::SignalDetected {
                symbol: symbol.clone(),
                signal,
                avg_range: report.avg_range,
                last_range: report.last_range,
            })
            .await;

        match self
            .watcher
            .watch(&signal, shutdown, Some(&self.positions))
            .await?
        {
            WatchOutcome::Triggered { .. } => {
                let outcome = self.positions.apply(&signal).await?;
                Ok(CycleOutcome::Acted(outcome))
            }
            WatchOutcome::Expired { .. } => Ok(CycleOutcome::Expired),
            WatchOutcome::Cancelled => Ok(CycleOutcome::Cancelled),
        }
    }
}

/// Run the trading loop for one symbol until `shutdown` fires.
///
/// Returns early only on an invalid configuration or a fatal gateway error.
pub async fn run_symbol(cfg: SymbolConfig, gateways: Gateways, shutdown: Shutdown) -> Result<()> {
    cfg.validate()?;
    SymbolRunner::new(cfg, gateways).run(shutdown).await
}
