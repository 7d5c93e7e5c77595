pub mod binance;
pub mod journal;
pub mod lifecycle;
pub mod runner;
pub mod scheduler;
pub mod shutdown;
pub mod watcher;

pub use binance::BinanceMarketData;
pub use journal::{FanoutSink, SqliteJournal, TracingSink};
pub use lifecycle::Supervisor;
pub use runner::{run_symbol, CycleOutcome, Gateways, SymbolRunner};
pub use scheduler::CycleScheduler;
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use watcher::{TriggerWatcher, WatchOutcome};
