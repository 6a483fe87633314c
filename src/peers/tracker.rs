//! Peer snapshot polling and connect/disconnect diffing.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::addrman::AddrManCache;
use super::address::is_public_address;
use super::provider::PeerInfoProvider;
use super::types::{ChangeEvent, ChangeKind, PeerAddress, PeerRecord};
use crate::broadcaster::{UpdateBroadcaster, UpdateKind};
use crate::config::{ADDRMAN_REFRESH_EVERY, RECENT_CHANGES_WINDOW, REFRESH_INTERVAL_SECS};
use crate::geo::GeoResolutionPipeline;

#[derive(Debug, Clone, Copy)]
pub struct TrackerSettings {
    pub interval: Duration,
    /// Refresh the addrman cache every this many ticks
    pub addrman_refresh_every: u32,
    /// How long change events are kept
    pub recent_window: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        TrackerSettings {
            interval: Duration::from_secs(REFRESH_INTERVAL_SECS),
            addrman_refresh_every: ADDRMAN_REFRESH_EVERY,
            recent_window: RECENT_CHANGES_WINDOW,
        }
    }
}

/// State carried from one tick to the next.
///
/// Owned by the loop driving the ticks, so two ticks can never interleave.
#[derive(Debug, Default)]
pub struct TickState {
    previous_ids: HashSet<i64>,
    ticks: u64,
    since_addrman_refresh: u32,
}

/// What one tick observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub peers: usize,
    pub connected: usize,
    pub disconnected: usize,
    pub lookups_queued: usize,
    pub addrman_refreshed: bool,
}

pub struct PeerChangeTracker {
    provider: Arc<dyn PeerInfoProvider>,
    addrman: Arc<AddrManCache>,
    geo: Arc<GeoResolutionPipeline>,
    broadcaster: Arc<UpdateBroadcaster>,
    snapshot: RwLock<Arc<Vec<PeerRecord>>>,
    identities: Mutex<HashMap<i64, PeerAddress>>,
    changes: Mutex<Vec<ChangeEvent>>,
    settings: TrackerSettings,
    cancel: CancellationToken,
}

impl PeerChangeTracker {
    pub fn new(
        provider: Arc<dyn PeerInfoProvider>,
        addrman: Arc<AddrManCache>,
        geo: Arc<GeoResolutionPipeline>,
        broadcaster: Arc<UpdateBroadcaster>,
        settings: TrackerSettings,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(PeerChangeTracker {
            provider,
            addrman,
            geo,
            broadcaster,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            identities: Mutex::new(HashMap::new()),
            changes: Mutex::new(Vec::new()),
            settings,
            cancel,
        })
    }

    /// Latest peer snapshot.
    pub fn snapshot(&self) -> Arc<Vec<PeerRecord>> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Change events inside the retention window, oldest first.
    pub fn recent_changes(&self) -> Vec<ChangeEvent> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of remembered peer addresses (bounded by connected peers).
    pub fn tracked_identities(&self) -> usize {
        self.identities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ticks until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut state = TickState::default();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = self.tick(&mut state) => {}
            }
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.interval) => {}
            }
        }
        debug!("Peer tracker stopped");
    }

    /// One refresh cycle: poll, diff against the previous tick, queue geo
    /// lookups, prune old changes, notify.
    pub async fn tick(&self, state: &mut TickState) -> TickReport {
        let peers = match self.provider.list_peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Peer info unavailable, treating as empty: {e}");
                Vec::new()
            }
        };
        let first_tick = state.ticks == 0;
        state.ticks += 1;

        let mut report = TickReport {
            peers: peers.len(),
            ..Default::default()
        };

        state.since_addrman_refresh += 1;
        if state.since_addrman_refresh >= self.settings.addrman_refresh_every.max(1) {
            state.since_addrman_refresh = 0;
            report.addrman_refreshed = self.addrman.refresh().await;
        }

        let now = Instant::now();
        let timestamp = Utc::now().timestamp();
        let mut events = Vec::new();
        let mut current_ids = HashSet::with_capacity(peers.len());

        for peer in &peers {
            current_ids.insert(peer.id);
            let address = peer.address();

            if !first_tick && !state.previous_ids.contains(&peer.id) {
                events.push(ChangeEvent {
                    at: now,
                    timestamp,
                    kind: ChangeKind::Connected,
                    address: address.clone(),
                });
            }

            if !self.geo.has_entry(&address.ip) {
                if is_public_address(&address.network, &address.ip) {
                    if self.geo.resolve(&address.ip, &address.network) {
                        report.lookups_queued += 1;
                    }
                } else {
                    self.geo.mark_private(&address.ip);
                }
            }

            self.identities
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(peer.id, address);
        }

        for gone in state.previous_ids.difference(&current_ids) {
            let address = self
                .identities
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(gone)
                .unwrap_or_else(|| PeerAddress::unknown(*gone));
            events.push(ChangeEvent {
                at: now,
                timestamp,
                kind: ChangeKind::Disconnected,
                address,
            });
        }

        report.connected = events
            .iter()
            .filter(|e| e.kind == ChangeKind::Connected)
            .count();
        report.disconnected = events.len() - report.connected;

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(peers);

        {
            let mut changes = self.changes.lock().unwrap_or_else(PoisonError::into_inner);
            changes.extend(events);
            let window = self.settings.recent_window;
            changes.retain(|e| now.saturating_duration_since(e.at) < window);
        }

        state.previous_ids = current_ids;

        debug!(
            "Peer tick: {} peers, +{} -{}, {} geo lookups queued",
            report.peers, report.connected, report.disconnected, report.lookups_queued
        );
        self.broadcaster.publish(UpdateKind::PeersUpdate);
        report
    }
}
