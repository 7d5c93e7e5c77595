use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use common::{Error, SymbolConfig};

use crate::runner::{run_symbol, Gateways};
use crate::shutdown::{self, Shutdown, ShutdownTrigger};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Runs one independent loop per symbol and restarts a loop that fails.
///
/// Loops share nothing except the gateways: a failure in one symbol never
/// stops another.
pub struct Supervisor {
    trigger: ShutdownTrigger,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    /// Spawn a task per symbol. Invalid configs are logged and not started.
    pub fn spawn(symbols: Vec<SymbolConfig>, gateways: Gateways) -> Self {
        let (trigger, _) = shutdown::channel();
        let mut tasks = Vec::with_capacity(symbols.len());

        for cfg in symbols {
            if let Err(e) = cfg.validate() {
                error!(symbol = %cfg.symbol, error = %e, "Invalid symbol config, not starting");
                continue;
            }
            let name = cfg.symbol.clone();
            let handle = tokio::spawn(supervise(cfg, gateways.clone(), trigger.token()));
            tasks.push((name, handle));
        }

        info!(symbols = tasks.len(), "Supervisor started");
        Self { trigger, tasks }
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|(s, _)| s.as_str())
    }

    /// Fire shutdown and wait for every loop to exit.
    pub async fn shutdown(self) {
        info!("Stopping all symbol loops");
        self.trigger.trigger();
        self.join().await;
    }

    /// Wait for every loop to exit on its own.
    pub async fn join(self) {
        for (symbol, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(%symbol, error = %e, "Symbol task panicked");
            }
        }
    }
}

/// Delay before the next restart. A loop that stayed up longer than the
/// maximum backoff counts as healthy and starts over from the initial delay.
fn restart_delay(backoff: Duration, ran_for: Duration) -> Duration {
    if ran_for >= MAX_BACKOFF {
        INITIAL_BACKOFF
    } else {
        backoff
    }
}

/// Keep one symbol loop alive until shutdown, backing off between restarts.
/// Errors and panics inside the loop are both restarted.
async fn supervise(cfg: SymbolConfig, gateways: Gateways, mut shutdown: Shutdown) {
    let symbol = cfg.symbol.clone();
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let started = Instant::now();
        let run = tokio::spawn(run_symbol(cfg.clone(), gateways.clone(), shutdown.clone()));
        let failure = match run.await {
            Ok(Ok(())) => break,
            Ok(Err(e @ Error::Config(_))) => {
                error!(%symbol, error = %e, "Symbol loop stopped on configuration error");
                break;
            }
            Ok(Err(e)) => e.to_string(),
            Err(e) => format!("symbol loop panicked: {e}"),
        };

        let delay = restart_delay(backoff, started.elapsed());
        warn!(
            %symbol,
            error = %failure,
            retry_in_secs = delay.as_secs(),
            "Symbol loop failed, restarting"
        );
        if !shutdown.sleep(delay).await {
            break;
        }
        backoff = (delay * 2).min(MAX_BACKOFF);
    }

    info!(%symbol, "Symbol supervisor exited");
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use async_trait::async_trait;
    use common::{OrderGateway, OrderOutcome, Position, Result, TradeIntent};
    use paper::{PaperClient, SimulatedMarket};

    use crate::journal::MemorySink;

    fn gateways() -> Gateways {
        let market = Arc::new(SimulatedMarket::new());
        Gateways {
            market: market.clone(),
            orders: Arc::new(PaperClient::new(market, 0.0)),
            sink: Arc::new(MemorySink::default()),
        }
    }

    #[tokio::test]
    async fn invalid_configs_are_not_started() {
        let mut bad = SymbolConfig::new("GBPUSD", 0.01);
        bad.retracement_fraction = 1.5;
        let sup = Supervisor::spawn(vec![SymbolConfig::new("EURUSD", 0.03), bad], gateways());

        assert_eq!(sup.symbols().collect::<Vec<_>>(), vec!["EURUSD"]);
        sup.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_stops_every_loop() {
        let sup = Supervisor::spawn(
            vec![SymbolConfig::new("EURUSD", 0.03), SymbolConfig::new("XAUUSD", 0.09)],
            gateways(),
        );
        tokio::time::timeout(Duration::from_secs(5), sup.shutdown())
            .await
            .expect("loops did not stop");
    }

    #[test]
    fn backoff_resets_after_a_healthy_run() {
        assert_eq!(restart_delay(Duration::from_secs(32), Duration::from_secs(5)), Duration::from_secs(32));
        assert_eq!(restart_delay(MAX_BACKOFF, Duration::from_secs(3600)), INITIAL_BACKOFF);
    }

    #[derive(Clone, Copy)]
    enum FirstCall {
        SessionLost,
        Panic,
    }

    /// Order gateway that fails its first position query, then reports a flat
    /// account. Records when each query arrived.
    struct FailsOnce {
        first: FirstCall,
        calls: Mutex<Vec<Instant>>,
    }

    impl FailsOnce {
        fn new(first: FirstCall) -> Self {
            Self { first, calls: Mutex::new(Vec::new()) }
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OrderGateway for FailsOnce {
        async fn get_open_positions(&self, _symbol: &str) -> Result<Vec<Position>> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len()
            };
            if n == 1 {
                match self.first {
                    FirstCall::SessionLost => return Err(Error::Session("terminal disconnected".into())),
                    FirstCall::Panic => panic!("gateway bug"),
                }
            }
            Ok(Vec::new())
        }

        async fn submit_order(&self, _intent: &TradeIntent) -> Result<OrderOutcome> {
            Ok(OrderOutcome::rejected(0, "not expected"))
        }
    }

    fn failing_gateways(orders: Arc<FailsOnce>) -> Gateways {
        Gateways {
            market: Arc::new(SimulatedMarket::new()),
            orders,
            sink: Arc::new(MemorySink::default()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn session_loss_restarts_loop_after_backoff() {
        let orders = Arc::new(FailsOnce::new(FirstCall::SessionLost));
        let sup = Supervisor::spawn(vec![SymbolConfig::new("EURUSD", 0.03)], failing_gateways(orders.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;

        let calls = orders.calls();
        assert!(calls.len() >= 2, "loop was not restarted: {} calls", calls.len());
        assert!(calls[1] - calls[0] >= INITIAL_BACKOFF);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_loop_is_restarted() {
        let orders = Arc::new(FailsOnce::new(FirstCall::Panic));
        let sup = Supervisor::spawn(vec![SymbolConfig::new("EURUSD", 0.03)], failing_gateways(orders.clone()));

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(orders.calls().len() >= 2);
        sup.shutdown().await;
    }
}
