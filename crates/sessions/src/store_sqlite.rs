use std::str::FromStr;

use {
    async_trait::async_trait,
    serde_json::Value,
    sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    tracing::{debug, info, warn},
};

use {
    crate::{
        address::Address,
        error::{Error, Result},
        store::{SessionData, SessionRecord, SessionStore},
    },
    parley_config::StoreConfig,
};

// ── SQLite-backed session store ─────────────────────────────────────

/// SQLite-backed session store. One row per address, data kept as a JSON
/// text blob.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    eth_address: String,
    data: String,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        let address = Address::new(self.eth_address)?;
        let data = decode(&address, &self.data)?;
        Ok(SessionRecord { address, data })
    }
}

fn decode(address: &Address, raw: &str) -> Result<SessionData> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::Decode {
            address: address.to_string(),
            reason: format!("found {}", json_kind(&other)),
        }),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Log pool exhaustion or shutdown where the pool lives; callers only see
/// the failed call.
fn log_pool_error(op: &'static str, error: &sqlx::Error) {
    if matches!(error, sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) {
        warn!(op, error = %error, "session store pool unavailable");
    }
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pooled connection to `url` sized by `config` and create the
    /// schema if it is missing.
    pub async fn connect(url: &str, config: &StoreConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        if let Some(parent) = options.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(config.idle_timeout())
            .acquire_timeout(config.acquire_timeout())
            .connect_with(options)
            .await?;

        Self::init(&pool).await?;
        info!(
            url,
            max_connections = config.max_connections,
            "session store connected"
        );
        Ok(Self::new(pool))
    }

    /// Create the `bot_sessions` table if it doesn't exist.
    pub async fn init(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS bot_sessions (
                eth_address TEXT PRIMARY KEY,
                data        TEXT NOT NULL
            )"#,
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn fetch(&self, address: &Address) -> Result<Option<SessionData>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT eth_address, data FROM bot_sessions WHERE eth_address = ?",
        )
        .bind(address.as_str())
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|e| log_pool_error("fetch", e))?;

        row.map(|r| decode(address, &r.data)).transpose()
    }

    async fn upsert(&self, address: &Address, data: &SessionData) -> Result<()> {
        let blob = serde_json::to_string(data)?;
        sqlx::query(
            r#"INSERT INTO bot_sessions (eth_address, data)
               VALUES (?, ?)
               ON CONFLICT(eth_address) DO UPDATE SET
                 data = excluded.data"#,
        )
        .bind(address.as_str())
        .bind(&blob)
        .execute(&self.pool)
        .await
        .inspect_err(|e| log_pool_error("upsert", e))?;
        debug!(address = %address, bytes = blob.len(), "session upserted");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        sqlx::query_as::<_, SessionRow>(
            "SELECT eth_address, data FROM bot_sessions ORDER BY eth_address ASC",
        )
        .fetch_all(&self.pool)
        .await
        .inspect_err(|e| log_pool_error("list", e))?
        .into_iter()
        .map(SessionRow::into_record)
        .collect()
    }

    async fn delete(&self, address: &Address) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bot_sessions WHERE eth_address = ?")
            .bind(address.as_str())
            .execute(&self.pool)
            .await
            .inspect_err(|e| log_pool_error("delete", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    async fn sqlite_store(dir: &tempfile::TempDir) -> SqliteSessionStore {
        let url = format!("sqlite://{}", dir.path().join("sessions.db").display());
        SqliteSessionStore::connect(&url, &StoreConfig::default())
            .await
            .unwrap()
    }

    fn data(pairs: Value) -> SessionData {
        match pairs {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_sqlite_fetch_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        let addr = Address::new("0xnobody").unwrap();
        assert!(store.fetch(&addr).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_upsert_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        let addr = Address::new("0xabc").unwrap();

        store
            .upsert(&addr, &data(json!({"address": "0xabc", "a": 1, "b": 2})))
            .await
            .unwrap();
        store
            .upsert(&addr, &data(json!({"address": "0xabc", "a": 3})))
            .await
            .unwrap();

        let list = store.list().await.unwrap();
        assert_eq!(list.len(), 1);
        let fetched = store.fetch(&addr).await.unwrap().unwrap();
        assert_eq!(fetched, data(json!({"address": "0xabc", "a": 3})));
    }

    #[tokio::test]
    async fn test_sqlite_list_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        for raw in ["0xb", "0xa"] {
            let addr = Address::new(raw).unwrap();
            store
                .upsert(&addr, &data(json!({"address": raw})))
                .await
                .unwrap();
        }

        let list = store.list().await.unwrap();
        let keys: Vec<&str> = list.iter().map(|r| r.address.as_str()).collect();
        assert_eq!(keys, ["0xa", "0xb"]);

        let addr = Address::new("0xa").unwrap();
        assert!(store.delete(&addr).await.unwrap());
        assert!(!store.delete(&addr).await.unwrap());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_rejects_non_object_blob() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        sqlx::query("INSERT INTO bot_sessions (eth_address, data) VALUES (?, ?)")
            .bind("0xbad")
            .bind("[1, 2]")
            .execute(store.pool())
            .await
            .unwrap();

        let addr = Address::new("0xbad").unwrap();
        assert!(matches!(
            store.fetch(&addr).await,
            Err(Error::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_sqlite_closed_pool_reports_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = sqlite_store(&dir).await;
        store.close().await;

        let addr = Address::new("0xabc").unwrap();
        assert!(matches!(
            store.fetch(&addr).await,
            Err(Error::Store(sqlx::Error::PoolClosed))
        ));
        assert!(matches!(
            store.upsert(&addr, &data(json!({"address": "0xabc"}))).await,
            Err(Error::Store(sqlx::Error::PoolClosed))
        ));
    }

    #[tokio::test]
    async fn test_sqlite_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let addr = Address::new("0xabc").unwrap();
        {
            let store = sqlite_store(&dir).await;
            store
                .upsert(&addr, &data(json!({"address": "0xabc", "k": "v"})))
                .await
                .unwrap();
            store.close().await;
        }
        let store = sqlite_store(&dir).await;
        let fetched = store.fetch(&addr).await.unwrap().unwrap();
        assert_eq!(fetched["k"], json!("v"));
    }
}
