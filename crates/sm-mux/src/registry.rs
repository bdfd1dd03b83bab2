//! Connection registry
//!
//! Maps connection ids to live [`Client`]s. The accept loop (or the agent's
//! dialer) inserts, the dispatcher looks up and removes. A single lock guards
//! the map and is held for one map operation only; callers do their socket
//! I/O after the guard is gone.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sm_protocol::ConnectionId;

use crate::client::Client;
use crate::error::RegistryError;

/// Live logical connections indexed by id
pub struct Registry {
    clients: Mutex<HashMap<ConnectionId, Arc<Client>>>,
    /// Optional ceiling on concurrent connections
    max_connections: Option<usize>,
}

impl Registry {
    /// Create an unbounded registry
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Create a registry refusing inserts beyond `max_connections`
    pub fn with_limit(max_connections: Option<usize>) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_connections,
        }
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<Client>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a new connection
    pub fn insert(&self, client: Arc<Client>) -> Result<(), RegistryError> {
        let mut clients = self.clients();
        if let Some(max) = self.max_connections {
            if clients.len() >= max {
                return Err(RegistryError::Full(max));
            }
        }
        if clients.contains_key(client.id()) {
            return Err(RegistryError::Duplicate(client.id().clone()));
        }
        clients.insert(client.id().clone(), client);
        Ok(())
    }

    /// Whether another connection would fit under the ceiling
    pub fn has_capacity(&self) -> bool {
        match self.max_connections {
            Some(max) => self.len() < max,
            None => true,
        }
    }

    /// Ceiling on concurrent connections, if any
    pub fn limit(&self) -> Option<usize> {
        self.max_connections
    }

    /// Get a connection by id
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients().get(id).map(Arc::clone)
    }

    /// Remove a connection; only one caller ever gets `Some` for an id
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Client>> {
        self.clients().remove(id)
    }

    /// Remove and return every connection
    pub fn drain(&self) -> Vec<Arc<Client>> {
        self.clients().drain().map(|(_, client)| client).collect()
    }

    /// Number of registered connections
    pub fn len(&self) -> usize {
        self.clients().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::duplex_client;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_insert_get_remove() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = Registry::new();
        let (client, _far) = duplex_client("c1", tx);

        registry.insert(client).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&"c1".into()).is_some());
        assert!(registry.get(&"c2".into()).is_none());

        assert!(registry.remove(&"c1".into()).is_some());
        assert!(registry.remove(&"c1".into()).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = Registry::new();
        let (first, _a) = duplex_client("c1", tx.clone());
        let (second, _b) = duplex_client("c1", tx);

        registry.insert(first).unwrap();
        assert_eq!(
            registry.insert(second),
            Err(RegistryError::Duplicate("c1".into()))
        );
    }

    #[tokio::test]
    async fn test_limit() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = Registry::with_limit(Some(1));
        let (first, _a) = duplex_client("c1", tx.clone());
        let (second, _b) = duplex_client("c2", tx);

        assert!(registry.has_capacity());
        registry.insert(first).unwrap();
        assert!(!registry.has_capacity());
        assert_eq!(registry.limit(), Some(1));
        assert_eq!(registry.insert(second), Err(RegistryError::Full(1)));
    }

    #[tokio::test]
    async fn test_drain() {
        let (tx, _rx) = mpsc::channel(4);
        let registry = Registry::new();
        let (a, _fa) = duplex_client("a", tx.clone());
        let (b, _fb) = duplex_client("b", tx);
        registry.insert(a).unwrap();
        registry.insert(b).unwrap();

        let mut ids: Vec<ConnectionId> = registry
            .drain()
            .iter()
            .map(|client| client.id().clone())
            .collect();
        ids.sort();
        assert_eq!(ids, vec![ConnectionId::from("a"), ConnectionId::from("b")]);
        assert!(registry.is_empty());
    }
}
