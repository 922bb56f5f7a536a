//! Ordered persistence for session records.
//!
//! Every address owns one writer task fed through an unbounded channel and
//! shared by all sessions of that address, so flushes reach the store in the
//! order they were issued even though `Session::set` returns before the round
//! trip completes. A load first waits for that queue to drain, so it always
//! sees writes queued before it started. Store calls for one address also
//! take a shared per-address lock, which orders queued writes against
//! operator patches.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, mpsc, oneshot},
    tracing::{debug, trace, warn},
};

use crate::{
    address::Address,
    error::{Error, Result},
    store::{SessionData, SessionStore},
};

/// Tracked addresses above which idle locks are pruned on acquire.
const PRUNE_THRESHOLD: usize = 1024;

/// Per-address mutual exclusion shared by every session of one manager.
#[derive(Default)]
pub struct AddressLocks {
    locks: Mutex<HashMap<Address, Arc<AsyncMutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `address`. Released on drop.
    pub async fn acquire(&self, address: &Address) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if locks.len() >= PRUNE_THRESHOLD {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(locks.entry(address.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Number of tracked addresses.
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget locks nobody holds or waits on.
    pub fn prune_idle(&self) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

/// Store handle plus the policy every session applies to it.
#[derive(Clone)]
pub(crate) struct Backend {
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) locks: Arc<AddressLocks>,
    pub(crate) timeout: Duration,
}

impl Backend {
    /// Run a store call under the configured timeout.
    pub(crate) async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.timeout)),
        }
    }

    pub(crate) async fn fetch(&self, address: &Address) -> Result<Option<SessionData>> {
        let _guard = self.locks.acquire(address).await;
        self.bounded(self.store.fetch(address)).await
    }

    async fn upsert(&self, address: &Address, data: &SessionData) -> Result<()> {
        let _guard = self.locks.acquire(address).await;
        self.bounded(self.store.upsert(address, data)).await
    }
}

enum WriteOp {
    Upsert(SessionData),
    Barrier(oneshot::Sender<()>),
}

/// Sending half of an address's writer task.
///
/// Dropping it lets the task drain what is already queued and exit.
pub(crate) struct FlushQueue {
    tx: mpsc::UnboundedSender<WriteOp>,
    pending: Arc<AtomicUsize>,
}

impl FlushQueue {
    /// Start the writer task for `address`. Requires a Tokio runtime.
    pub(crate) fn spawn(address: Address, backend: Backend) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        tokio::spawn(run_writer(address, backend, rx, Arc::clone(&pending)));
        Self { tx, pending }
    }

    /// Queue a full-record write.
    pub(crate) fn enqueue(&self, data: SessionData) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(WriteOp::Upsert(data)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("session writer stopped, flush dropped");
        }
    }

    /// Writes queued but not yet attempted.
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Resolve once every write queued before this call has been attempted.
    pub(crate) async fn sync(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Barrier(done_tx)).is_ok() {
            done_rx.await.ok();
        }
    }
}

async fn run_writer(
    address: Address,
    backend: Backend,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
    pending: Arc<AtomicUsize>,
) {
    let mut written: u64 = 0;
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Upsert(data) => {
                match backend.upsert(&address, &data).await {
                    Ok(()) => {
                        written += 1;
                        trace!(address = %address, "session flushed");
                    },
                    Err(e) => warn!(address = %address, error = %e, "session flush failed"),
                }
                pending.fetch_sub(1, Ordering::SeqCst);
            },
            WriteOp::Barrier(done) => {
                done.send(()).ok();
            },
        }
    }
    debug!(address = %address, written, "session writer finished");
}

/// One shared writer queue per address.
///
/// Every session of an address enqueues into the same task, and a load waits
/// on it before fetching. Queues with no session attached and nothing
/// pending are pruned, which ends their writer task.
#[derive(Default)]
pub(crate) struct WriteQueues {
    queues: Mutex<HashMap<Address, Arc<FlushQueue>>>,
}

impl WriteQueues {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The queue for `address`, starting its writer task on first use.
    pub(crate) fn queue(&self, address: &Address, backend: &Backend) -> Arc<FlushQueue> {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        if queues.len() >= PRUNE_THRESHOLD {
            queues.retain(|_, queue| !is_idle(queue));
        }
        Arc::clone(
            queues
                .entry(address.clone())
                .or_insert_with(|| Arc::new(FlushQueue::spawn(address.clone(), backend.clone()))),
        )
    }

    /// Wait for every queue to drain what it holds right now.
    pub(crate) async fn sync_all(&self) {
        let queues: Vec<Arc<FlushQueue>> = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for queue in queues {
            queue.sync().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop queues no session holds and that have nothing left to write.
    pub(crate) fn prune_idle(&self) {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, queue| !is_idle(queue));
    }
}

fn is_idle(queue: &Arc<FlushQueue>) -> bool {
    Arc::strong_count(queue) == 1 && queue.pending() == 0
}
