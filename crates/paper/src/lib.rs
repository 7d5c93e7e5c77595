pub mod client;
pub mod market;

pub use client::PaperClient;
pub use market::SimulatedMarket;
