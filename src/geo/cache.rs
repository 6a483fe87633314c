//! Session cache and pending-lookup set.
//!
//! Each structure owns its own lock; neither is held while calling out.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};

use super::types::{GeoEntry, GeoStatus};

/// Volatile IP → entry map read by consumers. Cleared only by restart.
#[derive(Default)]
pub struct SessionCache {
    entries: RwLock<HashMap<String, GeoEntry>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, ip: &str) -> Option<GeoEntry> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(ip)
            .cloned()
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(ip)
    }

    /// Status for `ip`; absent entries are pending.
    pub fn status(&self, ip: &str) -> GeoStatus {
        self.get(ip).map_or(GeoStatus::Pending, |e| e.status)
    }

    /// Stores a terminal entry. Pending entries are never stored, and a
    /// resolved entry is not downgraded to unavailable.
    pub fn insert(&self, ip: &str, entry: GeoEntry) {
        if entry.status == GeoStatus::Pending {
            return;
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entry.status == GeoStatus::Unavailable
            && entries.get(ip).is_some_and(|e| e.status == GeoStatus::Ok)
        {
            return;
        }
        entries.insert(ip.to_string(), entry);
    }

    /// Stores `entry` only if `ip` has no entry yet. Returns whether it was stored.
    pub fn insert_if_absent(&self, ip: &str, entry: GeoEntry) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.contains_key(ip) {
            return false;
        }
        entries.insert(ip.to_string(), entry);
        true
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// IPs queued, in flight or deferred. An IP is present at most once.
#[derive(Default)]
pub struct PendingLookupSet {
    ips: Mutex<HashSet<String>>,
}

impl PendingLookupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `ip`. Returns `false` if it was already pending.
    pub fn try_insert(&self, ip: &str) -> bool {
        self.ips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(ip.to_string())
    }

    /// Releases `ip`. Returns `false` if it was not pending.
    pub fn remove(&self, ip: &str) -> bool {
        self.ips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ip)
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.ips
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(ip)
    }

    pub fn len(&self) -> usize {
        self.ips.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
