use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Candle or quote fetch failed. Recovered by skipping the tick or cycle.
    #[error("Market data unavailable: {0}")]
    DataUnavailable(String),

    /// Gateway refused an intent. The position state must be re-queried.
    #[error("Order rejected (code {code:?}): {message}")]
    OrderRejected { code: Option<i32>, message: String },

    /// Broker state disagrees with what the last decision required.
    #[error("Inconsistent position state: {0}")]
    InconsistentState(String),

    /// Broker session lost. Not recoverable inside a symbol loop.
    #[error("Gateway session lost: {0}")]
    Session(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Process-level failures that must leave the symbol loop and reach the
    /// supervisor. Everything else is handled at the next tick or cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Session(_) | Error::Config(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
