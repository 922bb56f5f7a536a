use std::{collections::HashMap, sync::Arc};

use {anyhow::Result, async_trait::async_trait};

use crate::session::Session;

/// A conversation handler a session can be inside of.
///
/// `open` runs right after the session records the thread as current and may
/// move the session into its first state. `close` runs before the session
/// forgets the thread.
#[async_trait]
pub trait ConversationThread: Send + Sync {
    fn name(&self) -> &str;

    async fn open(&self, session: &mut Session) -> Result<()>;

    async fn close(&self, session: &mut Session) -> Result<()>;
}

/// Threads known to the agent, keyed by name.
///
/// Sessions only ever hold a lookup result from here; the registry owns the
/// handlers.
pub struct ThreadRegistry {
    threads: HashMap<String, Arc<dyn ConversationThread>>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: HashMap::new(),
        }
    }

    /// Register a handler under its own name, replacing any previous one.
    pub fn register(&mut self, thread: Arc<dyn ConversationThread>) {
        self.threads.insert(thread.name().to_string(), thread);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ConversationThread>> {
        self.threads.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.threads.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.threads.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl ConversationThread for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn open(&self, _session: &mut Session) -> Result<()> {
            Ok(())
        }

        async fn close(&self, _session: &mut Session) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ThreadRegistry::new();
        assert!(registry.is_empty());
        registry.register(Arc::new(Named("onboarding")));
        registry.register(Arc::new(Named("faucet")));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains("faucet"));
        assert_eq!(registry.get("onboarding").unwrap().name(), "onboarding");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.names(), ["faucet", "onboarding"]);
    }

    #[test]
    fn later_registration_replaces() {
        let mut registry = ThreadRegistry::new();
        let first: Arc<dyn ConversationThread> = Arc::new(Named("faucet"));
        registry.register(Arc::clone(&first));
        registry.register(Arc::new(Named("faucet")));
        assert_eq!(registry.len(), 1);
        assert!(!Arc::ptr_eq(&registry.get("faucet").unwrap(), &first));
    }
}
