use std::time::Duration;

/// Errors raised by the session layer.
///
/// Store failures (`Store`, `Timeout`, `Decode`) are absorbed and logged by
/// [`Session`](crate::Session) itself; they only reach callers through the
/// store and admin APIs.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    #[error("store query failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("session data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store setup failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("session data for {address} is not a JSON object: {reason}")]
    Decode { address: String, reason: String },

    #[error("unsupported store url: {0}")]
    UnsupportedStore(String),

    #[error("key {0:?} is reserved")]
    ReservedKey(String),

    #[error("no thread registered under {0:?}")]
    UnknownThread(String),

    #[error("thread {name:?} failed to open: {source}")]
    ThreadOpen {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
