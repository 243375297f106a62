//! Process-wide registry of live dial-out sessions.
//!
//! Owned by the server and passed explicitly to both the dial-out listener
//! and the probe handler. The map is guarded by a single reader/writer
//! lock; lookups take the read half so concurrent scrapes do not serialize
//! against each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;

use crate::catalogue::MetricStore;

/// Registration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("dial-out session for {0} already in progress")]
    AlreadyExists(String),
}

/// One live device session.
pub struct DeviceSession {
    metrics: Arc<MetricStore>,
    connected_at: Instant,
}

impl DeviceSession {
    /// How long this session has been connected.
    pub fn age(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }
}

/// Map from device address to its metric store. At most one session per
/// address at any time.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, DeviceSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically create and insert a fresh metric store for `address`.
    /// Fails without side effects when a session for the address exists.
    pub fn register(&self, address: &str) -> Result<Arc<MetricStore>, RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(address) {
            return Err(RegistryError::AlreadyExists(address.to_string()));
        }

        let metrics = Arc::new(MetricStore::new());
        sessions.insert(
            address.to_string(),
            DeviceSession {
                metrics: metrics.clone(),
                connected_at: Instant::now(),
            },
        );
        Ok(metrics)
    }

    /// Remove the session for `address`. Not an error if absent.
    pub fn unregister(&self, address: &str) {
        self.sessions.write().remove(address);
    }

    /// The metric store of the session for `address`, if one is live.
    pub fn lookup(&self, address: &str) -> Option<Arc<MetricStore>> {
        self.sessions.read().get(address).map(|s| s.metrics.clone())
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Snapshot of every live session's store, sorted by address.
    pub fn stores(&self) -> Vec<(String, Arc<MetricStore>)> {
        let sessions = self.sessions.read();
        let mut stores: Vec<(String, Arc<MetricStore>)> = sessions
            .iter()
            .map(|(addr, s)| (addr.clone(), s.metrics.clone()))
            .collect();
        stores.sort_by(|a, b| a.0.cmp(&b.0));
        stores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let store = registry.register("10.0.0.1").unwrap();
        store.fan_rpm.set(&["FAN-1"], 100.0);

        let looked_up = registry.lookup("10.0.0.1").unwrap();
        assert_eq!(looked_up.fan_rpm.value(&["FAN-1"]), Some(100.0));
        assert!(registry.lookup("10.0.0.2").is_none());
    }

    #[test]
    fn test_duplicate_register_fails() {
        let registry = SessionRegistry::new();
        registry.register("10.0.0.1").unwrap();

        let err = registry.register("10.0.0.1").unwrap_err();
        assert_eq!(err, RegistryError::AlreadyExists("10.0.0.1".to_string()));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_reregister_after_unregister() {
        let registry = SessionRegistry::new();
        let first = registry.register("10.0.0.1").unwrap();
        first.fan_rpm.set(&["FAN-1"], 1.0);

        registry.unregister("10.0.0.1");
        assert!(registry.lookup("10.0.0.1").is_none());

        // A fresh session starts with an empty store.
        let second = registry.register("10.0.0.1").unwrap();
        assert!(second.fan_rpm.is_empty());
    }

    #[test]
    fn test_unregister_missing_is_noop() {
        let registry = SessionRegistry::new();
        registry.unregister("10.0.0.1");
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_concurrent_register_single_winner() {
        let registry = Arc::new(SessionRegistry::new());

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.register("10.0.0.1").is_ok())
            })
            .collect();

        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_stores_sorted_by_address() {
        let registry = SessionRegistry::new();
        registry.register("10.0.0.2").unwrap();
        registry.register("10.0.0.1").unwrap();

        let stores = registry.stores();
        let addresses: Vec<&str> = stores.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);
    }
}
