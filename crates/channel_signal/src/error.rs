use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors produced inside the relay.
///
/// Only [`RelayError::Config`] ever reaches the caller of
/// [`Relay::start`](crate::relay::Relay::start); every other variant is
/// recovered inside the run loop and reported through logs and metrics.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Settings were missing or out of range.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A frame could not be decoded.
    #[error("malformed frame: {0}")]
    Parse(#[from] serde_json::Error),

    /// The stream could not be opened, or failed while open.
    #[error("connection error: {0}")]
    Connection(String),

    /// A read receipt was rejected or never completed.
    #[error("receipt failed: {0}")]
    Receipt(String),

    /// The downstream consumer went away.
    #[error("event sink closed: {0}")]
    Sink(String),
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> RelayError {
        RelayError::Connection(err.to_string())
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> RelayError {
        if err.is_timeout() {
            RelayError::Receipt(format!("timed out: {err}"))
        } else {
            RelayError::Receipt(err.to_string())
        }
    }
}

impl From<url::ParseError> for RelayError {
    fn from(err: url::ParseError) -> RelayError {
        RelayError::Config(format!("bad url: {err}"))
    }
}
