//! Host registry.
//!
//! Owns every [`HostRecord`] for the lifetime of the process. Records are
//! never removed. Each record sits behind its own mutex so discovery and
//! registration callbacks running on engine threads can mutate different
//! hosts concurrently while serializing access to the same host.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::host::HostRecord;

/// A registry-owned record, locked per host.
pub type SharedHost = Arc<Mutex<HostRecord>>;

/// Name-keyed map of host records with get-or-create semantics.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: RwLock<BTreeMap<String, SharedHost>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the record for `name`, inserting a default one if absent.
    pub fn get_or_create(&self, name: &str) -> SharedHost {
        if let Some(host) = self.hosts.read().get(name) {
            return Arc::clone(host);
        }

        let mut hosts = self.hosts.write();
        // Another thread may have inserted between the two locks.
        let host = hosts.entry(name.to_string()).or_insert_with(|| {
            tracing::debug!(host = %name, "creating host record");
            Arc::new(Mutex::new(HostRecord::new(name)))
        });
        Arc::clone(host)
    }

    /// Return the record for `name` if it exists.
    pub fn lookup(&self, name: &str) -> Option<SharedHost> {
        self.hosts.read().get(name).cloned()
    }

    /// Registered host names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.hosts.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }

    /// Consistent per-record copies, sorted by name.
    ///
    /// Each record is cloned under its own lock; the map lock is released
    /// before any record lock is taken.
    pub fn snapshot(&self) -> Vec<HostRecord> {
        let hosts: Vec<SharedHost> = self.hosts.read().values().cloned().collect();
        hosts.iter().map(|h| h.lock().clone()).collect()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn get_or_create_returns_same_record() {
        let registry = HostRegistry::new();
        let a = registry.get_or_create("den");
        a.lock().address = "10.0.0.2".into();

        let b = registry.get_or_create("den");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.lock().address, "10.0.0.2");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_missing_is_none() {
        let registry = HostRegistry::new();
        assert!(registry.lookup("nope").is_none());
        registry.get_or_create("yes");
        assert!(registry.lookup("yes").is_some());
    }

    #[test]
    fn names_are_sorted() {
        let registry = HostRegistry::new();
        registry.get_or_create("zeta");
        registry.get_or_create("alpha");
        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn concurrent_get_or_create_makes_one_record() {
        let registry = Arc::new(HostRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    let host = registry.get_or_create("shared");
                    host.lock().discovery_protocol_version += i;
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.len(), 1);
        let total: i32 = (0..8).sum();
        assert_eq!(
            registry.lookup("shared").unwrap().lock().discovery_protocol_version,
            total
        );
    }
}
