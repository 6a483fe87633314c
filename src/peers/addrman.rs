//! Cached address-manager membership.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use super::provider::AddressListProvider;

/// Set of addresses the node knows about, replaced wholesale on refresh.
pub struct AddrManCache {
    provider: Arc<dyn AddressListProvider>,
    addresses: RwLock<Arc<HashSet<String>>>,
}

impl AddrManCache {
    pub fn new(provider: Arc<dyn AddressListProvider>) -> Self {
        AddrManCache {
            provider,
            addresses: RwLock::new(Arc::new(HashSet::new())),
        }
    }

    /// Reloads the set. On provider failure the previous set stays.
    ///
    /// Returns `true` when the set was replaced.
    pub async fn refresh(&self) -> bool {
        match self.provider.list_addresses().await {
            Ok(fresh) => {
                let count = fresh.len();
                *self
                    .addresses
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = Arc::new(fresh);
                log::debug!("Addrman cache refreshed ({count} addresses)");
                true
            }
            Err(e) => {
                log::warn!("Addrman refresh failed, keeping previous set: {e}");
                false
            }
        }
    }

    pub fn contains(&self, ip: &str) -> bool {
        self.current().contains(ip)
    }

    pub fn len(&self) -> usize {
        self.current().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Arc<HashSet<String>> {
        Arc::clone(&self.addresses.read().unwrap_or_else(PoisonError::into_inner))
    }
}
