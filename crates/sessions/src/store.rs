/// Storage abstraction for session records.
use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tracing::info,
};

use {
    crate::{
        address::Address,
        error::{Error, Result},
        store_memory::MemorySessionStore,
        store_sqlite::SqliteSessionStore,
    },
    parley_config::{StoreConfig, data_dir},
};

/// The full data record of one session.
pub type SessionData = Map<String, Value>;

/// Key holding the Unix time (seconds) of the last flush.
pub const TIMESTAMP_KEY: &str = "timestamp";
/// Key mirroring the session address inside its record.
pub const ADDRESS_KEY: &str = "address";

/// One persisted row, as returned by the admin listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub address: Address,
    pub data: SessionData,
}

impl SessionRecord {
    /// Unix seconds of the last flush, if the record was ever flushed.
    pub fn timestamp(&self) -> Option<u64> {
        self.data.get(TIMESTAMP_KEY).and_then(Value::as_u64)
    }
}

/// Durable keyed storage for session records.
///
/// Writes are whole-record upserts: exactly one row exists per address and
/// each upsert fully replaces its data.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Point lookup by address.
    async fn fetch(&self, address: &Address) -> Result<Option<SessionData>>;

    /// Insert or fully overwrite the record for `address`.
    async fn upsert(&self, address: &Address, data: &SessionData) -> Result<()>;

    /// All records, ordered by address.
    async fn list(&self) -> Result<Vec<SessionRecord>>;

    /// Remove the record for `address`. Returns whether a row existed.
    async fn delete(&self, address: &Address) -> Result<bool>;

    /// Release pooled connections. Called once at shutdown.
    async fn close(&self) {}
}

/// Unix time in seconds.
pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Default SQLite URL under the data directory.
pub fn default_store_url() -> String {
    format!("sqlite://{}", data_dir().join("sessions.db").display())
}

/// Open the store described by `config`, creating the schema if needed.
pub async fn connect_store(config: &StoreConfig) -> Result<Arc<dyn SessionStore>> {
    let url = config.url.clone().unwrap_or_else(default_store_url);

    if url.starts_with("memory:") {
        info!("using in-memory session store");
        return Ok(Arc::new(MemorySessionStore::new()));
    }
    if url.starts_with("sqlite:") {
        let store = SqliteSessionStore::connect(&url, config).await?;
        return Ok(Arc::new(store));
    }
    Err(Error::UnsupportedStore(url))
}
