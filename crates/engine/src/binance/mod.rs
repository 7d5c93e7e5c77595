mod rest;

pub use rest::BinanceMarketData;
