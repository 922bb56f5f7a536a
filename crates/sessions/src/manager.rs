use std::{sync::Arc, time::Duration};

use {
    parley_config::ParleyConfig,
    serde_json::Value,
    tokio::task::JoinHandle,
    tracing::{debug, info},
};

use crate::{
    address::Address,
    error::{Error, Result},
    session::{Session, blank},
    store::{ADDRESS_KEY, SessionData, SessionStore, TIMESTAMP_KEY, connect_store, now_secs},
    thread::ThreadRegistry,
    transport::{LogTransport, Transport},
    writer::{AddressLocks, Backend, WriteQueues},
};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Hands out loaded sessions backed by one shared store.
///
/// Owns the process-wide store handle, the thread registry and the
/// transport. Cheap to clone; clones share all three.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    threads: Arc<ThreadRegistry>,
    transport: Arc<dyn Transport>,
    locks: Arc<AddressLocks>,
    queues: Arc<WriteQueues>,
    store_timeout: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, threads: ThreadRegistry) -> Self {
        Self {
            store,
            threads: Arc::new(threads),
            transport: Arc::new(LogTransport),
            locks: Arc::new(AddressLocks::new()),
            queues: Arc::new(WriteQueues::new()),
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Connect the configured store and apply session settings.
    pub async fn from_config(config: &ParleyConfig, threads: ThreadRegistry) -> Result<Self> {
        let store = connect_store(&config.store).await?;
        Ok(Self::new(store, threads).with_store_timeout(config.sessions.store_timeout()))
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = transport;
        self
    }

    /// Bound every load and flush round trip.
    pub fn with_store_timeout(mut self, limit: Duration) -> Self {
        self.store_timeout = limit;
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    fn backend(&self) -> Backend {
        Backend {
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
            timeout: self.store_timeout,
        }
    }

    /// Build the session for `address` and load its stored record.
    ///
    /// Resolves once the session is ready to use, after any writes still
    /// queued for the address by earlier sessions. Store failures never
    /// surface here; the session just starts blank.
    pub async fn open(&self, address: Address) -> Session {
        let backend = self.backend();
        let writes = self.queues.queue(&address, &backend);
        let mut session = Session::new(
            address,
            Arc::clone(&self.threads),
            Arc::clone(&self.transport),
            backend,
            writes,
        );
        session.load().await;
        debug!(
            address = %session.address(),
            thread = session.thread_name(),
            state = session.state(),
            "session ready"
        );
        session
    }

    /// Load the session in the background and hand it to `on_ready` exactly
    /// once.
    pub fn open_with<F>(&self, address: Address, on_ready: F) -> JoinHandle<()>
    where
        F: FnOnce(Session) + Send + 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let session = manager.open(address).await;
            on_ready(session);
        })
    }

    /// Write one key straight into the stored record without loading a
    /// session: no thread lookup, no hooks, the stored thread is kept as is.
    /// Meant for operators; returns the record as written.
    pub async fn patch(&self, address: &Address, key: &str, value: Value) -> Result<SessionData> {
        if key == ADDRESS_KEY {
            return Err(Error::ReservedKey(key.to_string()));
        }
        let backend = self.backend();
        self.queues.queue(address, &backend).sync().await;
        let _guard = self.locks.acquire(address).await;

        let mut data = backend
            .bounded(self.store.fetch(address))
            .await?
            .unwrap_or_else(|| blank(address));
        data.insert(ADDRESS_KEY.into(), Value::from(address.as_str()));
        data.insert(key.to_string(), value);
        data.insert(TIMESTAMP_KEY.into(), Value::from(now_secs()));

        backend.bounded(self.store.upsert(address, &data)).await?;
        info!(address = %address, key, "session patched");
        Ok(data)
    }

    /// Drain queued writes, then close the store's pooled connections.
    pub async fn shutdown(&self) {
        self.queues.sync_all().await;
        debug!(queues = self.queues.len(), "session writers drained");
        self.queues.prune_idle();
        self.locks.prune_idle();
        self.store.close().await;
        info!("session store closed");
    }
}
