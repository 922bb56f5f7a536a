use std::collections::BTreeMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::{
    address::Address,
    error::Result,
    store::{SessionData, SessionRecord, SessionStore},
};

/// Process-local store. Records vanish with the process.
#[derive(Default)]
pub struct MemorySessionStore {
    rows: RwLock<BTreeMap<Address, SessionData>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn fetch(&self, address: &Address) -> Result<Option<SessionData>> {
        Ok(self.rows.read().await.get(address).cloned())
    }

    async fn upsert(&self, address: &Address, data: &SessionData) -> Result<()> {
        self.rows
            .write()
            .await
            .insert(address.clone(), data.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .map(|(address, data)| SessionRecord {
                address: address.clone(),
                data: data.clone(),
            })
            .collect())
    }

    async fn delete(&self, address: &Address) -> Result<bool> {
        Ok(self.rows.write().await.remove(address).is_some())
    }
}
