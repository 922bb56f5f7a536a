//! Per-address conversational session.
//!
//! A session is a JSON record keyed by address, plus the conversation thread
//! the address is currently inside of and the state within that thread. Both
//! are persisted by name under the reserved `_thread` and `_state` keys.
//! Every mutation queues a full-record write on the address's shared writer;
//! see [`crate::writer`] for the ordering guarantees.

use std::{fmt, sync::Arc};

use {
    serde::de::DeserializeOwned,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{
    address::Address,
    error::{Error, Result},
    store::{ADDRESS_KEY, SessionData, TIMESTAMP_KEY, now_secs},
    thread::{ConversationThread, ThreadRegistry},
    transport::Transport,
    writer::{Backend, FlushQueue},
};

/// Reserved key naming the open thread.
pub const THREAD_KEY: &str = "_thread";
/// Reserved key naming the current state.
pub const STATE_KEY: &str = "_state";

pub struct Session {
    address: Address,
    data: SessionData,
    thread: Option<Arc<dyn ConversationThread>>,
    state: Option<String>,
    threads: Arc<ThreadRegistry>,
    transport: Arc<dyn Transport>,
    backend: Backend,
    writes: Arc<FlushQueue>,
}

pub(crate) fn blank(address: &Address) -> SessionData {
    let mut data = SessionData::new();
    data.insert(ADDRESS_KEY.into(), Value::from(address.as_str()));
    data
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}

impl Session {
    /// Build an unloaded session writing through `writes`.
    pub(crate) fn new(
        address: Address,
        threads: Arc<ThreadRegistry>,
        transport: Arc<dyn Transport>,
        backend: Backend,
        writes: Arc<FlushQueue>,
    ) -> Self {
        Self {
            data: blank(&address),
            address,
            thread: None,
            state: None,
            threads,
            transport,
            backend,
            writes,
        }
    }

    /// Replace in-memory data with the stored record, or start blank.
    ///
    /// Writes already queued for this address land first. Never fails:
    /// missing rows, store errors and timeouts all leave the session blank,
    /// the latter two with a warning.
    pub(crate) async fn load(&mut self) {
        self.thread = None;
        self.state = None;
        self.writes.sync().await;
        match self.backend.fetch(&self.address).await {
            Ok(Some(data)) => self.adopt(data),
            Ok(None) => {
                debug!(address = %self.address, "no stored session, starting blank");
                self.data = blank(&self.address);
            },
            Err(e) => {
                warn!(address = %self.address, error = %e, "session load failed, starting blank");
                self.data = blank(&self.address);
            },
        }
    }

    fn adopt(&mut self, mut data: SessionData) {
        let stored = data.get(ADDRESS_KEY).and_then(Value::as_str);
        if stored != Some(self.address.as_str()) {
            if let Some(stored) = stored {
                warn!(address = %self.address, stored, "stored address mismatch, overriding");
            }
            data.insert(ADDRESS_KEY.into(), Value::from(self.address.as_str()));
        }
        self.data = data;

        let stored_thread = self.data.get(THREAD_KEY).filter(|v| !v.is_null()).cloned();
        if let Some(stored) = stored_thread {
            match non_empty_str(Some(&stored)).and_then(|name| self.threads.get(name)) {
                Some(thread) => self.thread = Some(thread),
                None => {
                    warn!(
                        address = %self.address,
                        thread = %stored,
                        "stored thread is not registered, treating session as idle"
                    );
                    self.data.insert(THREAD_KEY.into(), Value::Null);
                    self.data.insert(STATE_KEY.into(), Value::Null);
                },
            }
        }
        self.state = non_empty_str(self.data.get(STATE_KEY)).map(str::to_owned);
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The whole in-memory record.
    pub fn data(&self) -> &SessionData {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Typed read. `None` when the key is absent or holds another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Store `value` under `key` and flush the whole record.
    ///
    /// The `address` key is fixed for the life of the session; writes to it
    /// are ignored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        if key == ADDRESS_KEY {
            warn!(address = %self.address, "refusing to overwrite session address");
            return;
        }
        self.data.insert(key, value.into());
        self.flush();
    }

    /// Stamp the record and queue a write of all of it.
    pub fn flush(&mut self) {
        self.data
            .insert(TIMESTAMP_KEY.into(), Value::from(now_secs()));
        self.writes.enqueue(self.data.clone());
    }

    /// Wait until every write queued so far for this address has reached the
    /// store (or failed and been logged).
    pub async fn sync(&self) {
        self.writes.sync().await;
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn set_state(&mut self, name: Option<&str>) {
        self.state = name.map(str::to_owned);
        self.set(STATE_KEY, name.map_or(Value::Null, Value::from));
    }

    /// The open thread handler, if any.
    pub fn thread(&self) -> Option<&Arc<dyn ConversationThread>> {
        self.thread.as_ref()
    }

    /// Name of the open thread as recorded in the session data.
    pub fn thread_name(&self) -> Option<&str> {
        non_empty_str(self.data.get(THREAD_KEY))
    }

    /// Close the current thread, record `name` as open and run its `open`
    /// hook.
    ///
    /// Fails without touching the session when `name` is not registered. If
    /// the hook fails the thread stays recorded as open.
    pub async fn open_thread(&mut self, name: &str) -> Result<()> {
        let Some(thread) = self.threads.get(name) else {
            return Err(Error::UnknownThread(name.to_string()));
        };

        self.close_thread().await;
        self.set(THREAD_KEY, name);
        self.thread = Some(Arc::clone(&thread));
        info!(address = %self.address, thread = name, "thread opened");

        thread
            .open(self)
            .await
            .map_err(|source| Error::ThreadOpen {
                name: name.to_string(),
                source,
            })
    }

    /// Run the open thread's `close` hook, then clear thread and state.
    ///
    /// The clearing writes happen even when no thread is open. A failing
    /// hook is logged and does not stop the thread from being cleared.
    pub async fn close_thread(&mut self) {
        if let Some(thread) = self.thread.clone() {
            if let Err(e) = thread.close(self).await {
                warn!(
                    address = %self.address,
                    thread = thread.name(),
                    error = %e,
                    "thread close hook failed"
                );
            }
            debug!(address = %self.address, thread = thread.name(), "thread closed");
        }
        self.thread = None;
        self.set(THREAD_KEY, Value::Null);
        self.set_state(None);
    }

    /// Close any thread and wipe everything except the address.
    pub async fn reset(&mut self) {
        self.close_thread().await;
        self.set_state(None);
        self.data = blank(&self.address);
        self.flush();
        info!(address = %self.address, "session reset");
    }

    /// Send a chat message to this session's address. Delivery failures are
    /// logged.
    pub async fn reply(&self, message: &str) {
        if let Err(e) = self.transport.send(self, message).await {
            warn!(address = %self.address, error = %e, "reply failed");
        }
    }

    /// Out-of-band call through the transport on behalf of this session.
    pub async fn rpc(&self, call: Value) -> anyhow::Result<Value> {
        self.transport.rpc(self, call).await
    }

    /// The whole record as a JSON string.
    pub fn to_json(&self) -> String {
        Value::Object(self.data.clone()).to_string()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("thread", &self.thread_name())
            .field("state", &self.state)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
