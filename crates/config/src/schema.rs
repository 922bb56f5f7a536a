/// Config schema types (session store and session behaviour).
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub store: StoreConfig,
    pub sessions: SessionsConfig,
}

/// Backing store for session records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Connection URL. `sqlite://<path>` or `memory://`.
    /// When unset, a SQLite file under the data directory is used.
    pub url: Option<String>,

    /// Upper bound on pooled connections shared by all sessions.
    pub max_connections: u32,

    /// Idle connections are closed after this many seconds.
    pub idle_timeout_secs: u64,

    /// How long to wait for a free connection before failing a query.
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            idle_timeout_secs: 30,
            acquire_timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Per-session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Bound on a single load or flush round trip, in milliseconds.
    pub store_timeout_ms: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
        }
    }
}

impl SessionsConfig {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }
}
