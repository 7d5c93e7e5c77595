pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod types;

pub use config::{Config, DirectionRule, RangeBaseline, SymbolConfig, SymbolFileConfig};
pub use error::{Error, Result};
pub use events::{EventSink, TradeEvent};
pub use gateway::{MarketDataGateway, OrderGateway};
pub use types::*;
