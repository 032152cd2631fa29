//! Per-database connection cache.
//!
//! Holds at most one live connection per database name, revalidated before
//! every reuse. The cache is bounded: once full, the least recently used
//! connection is closed to make room.

use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::store::{StoreConnection, StoreConnector, StoreError};

/// Default number of databases with a cached connection.
pub const DEFAULT_CACHE_CAPACITY: usize = 16;

/// Shared, lockable connection handed out by the cache.
pub type ConnectionHandle = Arc<Mutex<Box<dyn StoreConnection>>>;

/// Lock a connection handle, recovering from poisoning.
pub fn lock_connection(handle: &ConnectionHandle) -> MutexGuard<'_, Box<dyn StoreConnection>> {
    handle.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bounded map from database name to connection.
pub struct ConnectionCache {
    connector: Arc<dyn StoreConnector>,
    entries: Mutex<LruCache<String, ConnectionHandle>>,
}

impl ConnectionCache {
    /// Create a cache holding up to `capacity` connections (at least one).
    pub fn new(connector: Arc<dyn StoreConnector>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            connector,
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<String, ConnectionHandle>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a valid connection to `db_name`, opening one if needed.
    ///
    /// A cached connection that fails validation is closed and replaced. If
    /// opening fails, no entry is left for `db_name`.
    pub fn get_connection(&self, db_name: &str) -> Result<ConnectionHandle, StoreError> {
        let mut entries = self.entries();

        if let Some(handle) = entries.get(db_name) {
            let mut conn = lock_connection(handle);
            if conn.is_valid() {
                drop(conn);
                return Ok(Arc::clone(handle));
            }
            tracing::debug!(db_name, "Cached connection is no longer valid, replacing it");
            close_quietly(db_name, &mut **conn);
        }
        // Either absent or stale; a stale entry must not survive a failed reconnect.
        entries.pop(db_name);

        let handle: ConnectionHandle = Arc::new(Mutex::new(self.connector.connect(db_name)?));
        if let Some((evicted, old)) = entries.push(db_name.to_string(), Arc::clone(&handle)) {
            tracing::debug!(db_name = %evicted, "Evicting least recently used connection");
            close_quietly(&evicted, &mut **lock_connection(&old));
        }

        tracing::debug!(db_name, cached = entries.len(), "Opened new connection");
        Ok(handle)
    }

    /// Drop and close the connection cached for `db_name`, if any.
    pub fn invalidate(&self, db_name: &str) -> bool {
        let removed = self.entries().pop(db_name);
        match removed {
            Some(handle) => {
                close_quietly(db_name, &mut **lock_connection(&handle));
                true
            }
            None => false,
        }
    }

    /// Check whether a connection is cached for `db_name`.
    pub fn contains(&self, db_name: &str) -> bool {
        self.entries().contains(db_name)
    }

    /// Number of cached connections.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Maximum number of cached connections.
    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    /// Close every cached connection.
    pub fn clear(&self) {
        let mut entries = self.entries();
        while let Some((db_name, handle)) = entries.pop_lru() {
            close_quietly(&db_name, &mut **lock_connection(&handle));
        }
    }
}

impl fmt::Debug for ConnectionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

fn close_quietly(db_name: &str, conn: &mut dyn StoreConnection) {
    if let Err(e) = conn.close() {
        tracing::warn!(db_name, error = %e, "Failed to close connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreErrorKind};

    fn cache(store: &MemoryStore, capacity: usize) -> ConnectionCache {
        ConnectionCache::new(Arc::new(store.clone()), capacity)
    }

    #[test]
    fn test_reuses_valid_connection() {
        let store = MemoryStore::permissive();
        let cache = cache(&store, 4);

        let first = cache.get_connection("vehicles").unwrap();
        let second = cache.get_connection("vehicles").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.connections_opened(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_replaces_invalid_connection() {
        let store = MemoryStore::permissive();
        let cache = cache(&store, 4);

        let first = cache.get_connection("vehicles").unwrap();
        store.expire_connections();
        let second = cache.get_connection("vehicles").unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(store.connections_opened(), 2);
        assert_eq!(store.connections_closed(), 1);
        assert_eq!(cache.len(), 1);
        assert!(lock_connection(&second).is_valid());
    }

    #[test]
    fn test_failed_connect_leaves_no_entry() {
        let store = MemoryStore::permissive();
        store.refuse_connections(true);
        let cache = cache(&store, 4);

        let err = cache.get_connection("vehicles").err().unwrap();
        assert_eq!(err.kind, StoreErrorKind::Connection);
        assert!(!cache.contains("vehicles"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stale_entry_dropped_when_reconnect_fails() {
        let store = MemoryStore::permissive();
        let cache = cache(&store, 4);

        cache.get_connection("vehicles").unwrap();
        store.expire_connections();
        store.refuse_connections(true);

        assert!(cache.get_connection("vehicles").is_err());
        assert!(!cache.contains("vehicles"));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let store = MemoryStore::permissive();
        let cache = cache(&store, 2);

        cache.get_connection("a").unwrap();
        cache.get_connection("b").unwrap();
        // Touch "a" so "b" becomes the eviction candidate.
        cache.get_connection("a").unwrap();
        cache.get_connection("c").unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(store.connections_closed(), 1);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let store = MemoryStore::permissive();
        let cache = cache(&store, 4);

        cache.get_connection("a").unwrap();
        cache.get_connection("b").unwrap();

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(store.connections_closed(), 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let store = MemoryStore::permissive();
        assert_eq!(cache(&store, 0).capacity(), 1);
    }
}
