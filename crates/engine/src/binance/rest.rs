use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use common::{Candle, Error, MarketDataGateway, Quote, Result, Timeframe};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive transport failures after which the venue is treated as lost.
const SESSION_LOSS_AFTER: u32 = 5;

/// Counts back-to-back transport failures. A response of any status resets it.
#[derive(Debug, Default)]
struct TransportHealth {
    consecutive_failures: AtomicU32,
}

impl TransportHealth {
    fn reachable(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Classify a transport failure: recoverable until the streak reaches
    /// [`SESSION_LOSS_AFTER`], then a lost session.
    fn failed(&self, detail: String) -> Error {
        let streak = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if streak >= SESSION_LOSS_AFTER {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            Error::Session(format!("{streak} consecutive transport failures, last: {detail}"))
        } else {
            warn!(streak, %detail, "Market data request failed");
            Error::DataUnavailable(detail)
        }
    }
}

/// Public Binance REST endpoints used as a market data gateway. Only unsigned
/// endpoints are called; no API key is needed.
pub struct BinanceMarketData {
    base_url: String,
    http: Client,
    health: TransportHealth,
}

impl BinanceMarketData {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            health: TransportHealth::default(),
        })
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let url = format!("{}{path}", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| self.health.failed(e.to_string()))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| self.health.failed(e.to_string()))?;
        self.health.reachable();

        if !status.is_success() {
            return Err(Error::DataUnavailable(format!("HTTP {status}: {body}")));
        }
        Ok(body)
    }
}

/// Binance kline interval code for a timeframe.
pub fn interval_code(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1m",
        Timeframe::M5 => "5m",
        Timeframe::M15 => "15m",
        Timeframe::M30 => "30m",
        Timeframe::H1 => "1h",
        Timeframe::H4 => "4h",
        Timeframe::D1 => "1d",
    }
}

/// Parse a `/api/v3/klines` body. Each row is an array whose first five
/// fields are open time (ms), open, high, low and close; prices are strings.
fn parse_klines(body: &str) -> Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_str(body).map_err(|e| Error::DataUnavailable(e.to_string()))?;

    rows.iter().map(|row| parse_kline_row(row)).collect()
}

fn parse_kline_row(row: &[Value]) -> Result<Candle> {
    if row.len() < 5 {
        return Err(Error::DataUnavailable(format!(
            "kline row has {} fields, expected at least 5",
            row.len()
        )));
    }
    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| Error::DataUnavailable("kline open time is not an integer".into()))?;
    let open_time = DateTime::<Utc>::from_timestamp_millis(open_ms)
        .ok_or_else(|| Error::DataUnavailable(format!("kline open time {open_ms} out of range")))?;

    Ok(Candle {
        open_time,
        open: price_field(&row[1])?,
        high: price_field(&row[2])?,
        low: price_field(&row[3])?,
        close: price_field(&row[4])?,
    })
}

fn price_field(value: &Value) -> Result<f64> {
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| Error::DataUnavailable(format!("bad price {s:?}: {e}"))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| Error::DataUnavailable(format!("bad price {n}"))),
        other => Err(Error::DataUnavailable(format!("bad price {other}"))),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

fn parse_book_ticker(body: &str) -> Result<Option<Quote>> {
    let ticker: BookTicker =
        serde_json::from_str(body).map_err(|e| Error::DataUnavailable(e.to_string()))?;
    let bid = ticker
        .bid_price
        .parse::<f64>()
        .map_err(|e| Error::DataUnavailable(e.to_string()))?;
    let ask = ticker
        .ask_price
        .parse::<f64>()
        .map_err(|e| Error::DataUnavailable(e.to_string()))?;

    // An empty book is reported as zero prices.
    if bid <= 0.0 || ask <= 0.0 {
        return Ok(None);
    }
    Ok(Some(Quote {
        bid,
        ask,
        time: Utc::now(),
    }))
}

#[async_trait]
impl MarketDataGateway for BinanceMarketData {
    async fn get_recent_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<Candle>> {
        debug!(symbol, %timeframe, count, "Fetching klines");
        let body = self
            .get(
                "/api/v3/klines",
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval_code(timeframe).to_string()),
                    ("limit", count.to_string()),
                ],
            )
            .await?;
        let candles = parse_klines(&body)?;
        if candles.is_empty() {
            return Err(Error::DataUnavailable(format!("no klines returned for {symbol}")));
        }
        Ok(candles)
    }

    async fn get_current_quote(&self, symbol: &str) -> Result<Option<Quote>> {
        let body = self
            .get("/api/v3/ticker/bookTicker", &[("symbol", symbol.to_string())])
            .await?;
        parse_book_ticker(&body)
    }
}
