use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, EventSink, SymbolFileConfig};
use engine::{BinanceMarketData, FanoutSink, Gateways, SqliteJournal, Supervisor, TracingSink};
use paper::PaperClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let symbols = SymbolFileConfig::load(&cfg.symbols_config_path)
        .with_context(|| format!("loading {}", cfg.symbols_config_path))?
        .symbols;
    info!(
        symbols = symbols.len(),
        path = %cfg.symbols_config_path,
        market_data = %cfg.market_data_url,
        "BreakoutBot starting"
    );

    // ── Event sinks ───────────────────────────────────────────────────────────
    let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingSink)];
    match &cfg.database_url {
        Some(url) => {
            let journal = SqliteJournal::connect(url)
                .await
                .with_context(|| format!("opening trade journal at {url}"))?;
            sinks.push(Arc::new(journal));
        }
        None => warn!("DATABASE_URL not set, trade events are logged only"),
    }

    // ── Gateways ──────────────────────────────────────────────────────────────
    let market = Arc::new(BinanceMarketData::new(&cfg.market_data_url)?);
    info!(slippage_bps = cfg.paper_slippage_bps, "Paper execution, no live orders are sent");
    let orders = Arc::new(PaperClient::new(market.clone(), cfg.paper_slippage_bps));
    let gateways = Gateways {
        market,
        orders,
        sink: Arc::new(FanoutSink::new(sinks)),
    };

    // ── Symbol loops ──────────────────────────────────────────────────────────
    let supervisor = Supervisor::spawn(symbols, gateways);
    info!("All symbol loops started. Waiting for shutdown signal.");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    info!("Shutdown signal received, stopping symbol loops");
    supervisor.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
