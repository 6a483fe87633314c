//! Three-tier geolocation resolution: session cache, persistent store, API.
//!
//! Callers enqueue IPs with [`GeoResolutionPipeline::resolve`] and return at
//! once. A single worker drains the queue:
//!
//! 1. persistent store hit: copy into the session cache, no delay
//! 2. API unreachable (offline or store-only mode): park the IP on the
//!    offline retry list; it stays pending
//! 3. otherwise call the API, persist valid answers, cache every answer
//!
//! The API delay applies only after real API calls. While idle the worker
//! re-queues parked IPs once the API is reachable again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::api::GeoApiClient;
use super::cache::{PendingLookupSet, SessionCache};
use super::types::{GeoEntry, GeoRecord, GeoStatus, LookupOutcome};
use super::validate::is_valid_geo_data;
use crate::broadcaster::{UpdateBroadcaster, UpdateKind};
use crate::config::{API_UNAVAILABLE_AFTER, GEO_API_DELAY_MS, GEO_IDLE_POLL};
use crate::connectivity::ConnectivityMonitor;
use crate::error_handling::DatabaseError;
use crate::storage::GeoStore;

/// One queued lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoRequest {
    pub ip: String,
    pub network: String,
}

/// Worker pacing.
#[derive(Debug, Clone, Copy)]
pub struct GeoSettings {
    /// Minimum spacing between API calls
    pub api_delay: Duration,
    /// How long the worker waits on an empty queue before checking the
    /// offline retry list
    pub idle_poll: Duration,
}

impl Default for GeoSettings {
    fn default() -> Self {
        GeoSettings {
            api_delay: Duration::from_millis(GEO_API_DELAY_MS),
            idle_poll: GEO_IDLE_POLL,
        }
    }
}

/// What processing one request amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Answered from the persistent store
    Local,
    /// Parked without an API call
    Deferred,
    /// The API was called; `retry` when the call failed in transit
    Api { retry: bool },
}

pub struct GeoResolutionPipeline {
    session: SessionCache,
    pending: PendingLookupSet,
    queue_tx: mpsc::UnboundedSender<GeoRequest>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<GeoRequest>>>,
    store: Option<Arc<dyn GeoStore>>,
    api: Arc<dyn GeoApiClient>,
    connectivity: Arc<ConnectivityMonitor>,
    broadcaster: Arc<UpdateBroadcaster>,
    store_only: AtomicBool,
    api_failures: AtomicU32,
    settings: GeoSettings,
    cancel: CancellationToken,
}

impl GeoResolutionPipeline {
    /// Creates the pipeline. `store` is `None` when the persistent tier is
    /// disabled. Call [`GeoResolutionPipeline::run`] to start the worker.
    pub fn new(
        store: Option<Arc<dyn GeoStore>>,
        api: Arc<dyn GeoApiClient>,
        connectivity: Arc<ConnectivityMonitor>,
        broadcaster: Arc<UpdateBroadcaster>,
        settings: GeoSettings,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(GeoResolutionPipeline {
            session: SessionCache::new(),
            pending: PendingLookupSet::new(),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            store,
            api,
            connectivity,
            broadcaster,
            store_only: AtomicBool::new(false),
            api_failures: AtomicU32::new(0),
            settings,
            cancel,
        })
    }

    /// Enqueues `ip` for resolution and returns immediately.
    ///
    /// No-op (returns `false`) when the IP is already pending or already has a
    /// session entry.
    pub fn resolve(&self, ip: &str, network: &str) -> bool {
        if self.session.contains(ip) || !self.claim(ip) {
            return false;
        }
        let request = GeoRequest {
            ip: ip.to_string(),
            network: network.to_string(),
        };
        if self.queue_tx.send(request).is_err() {
            // Worker gone (shutdown): release so the set does not leak
            self.pending.remove(ip);
            return false;
        }
        true
    }

    /// Claims `ip` in the pending set unless a lookup finished meanwhile.
    ///
    /// `finish` writes the session entry before releasing the claim, so an
    /// entry seen after a successful claim means the IP was just resolved.
    fn claim(&self, ip: &str) -> bool {
        if !self.pending.try_insert(ip) {
            return false;
        }
        if self.session.contains(ip) {
            self.pending.remove(ip);
            return false;
        }
        true
    }

    /// Marks a non-routable address without any lookup.
    pub fn mark_private(&self, ip: &str) {
        self.session.insert_if_absent(ip, GeoEntry::private());
    }

    /// Session entry for `ip`, pending when absent.
    pub fn entry(&self, ip: &str) -> GeoEntry {
        self.session.get(ip).unwrap_or_else(GeoEntry::pending)
    }

    pub fn status(&self, ip: &str) -> GeoStatus {
        self.session.status(ip)
    }

    pub fn has_entry(&self, ip: &str) -> bool {
        self.session.contains(ip)
    }

    pub fn is_pending(&self, ip: &str) -> bool {
        self.pending.contains(ip)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn cached_count(&self) -> usize {
        self.session.len()
    }

    /// True while fewer than five consecutive API calls failed.
    pub fn api_available(&self) -> bool {
        self.api_failures.load(Ordering::SeqCst) < API_UNAVAILABLE_AFTER
    }

    pub fn store_only(&self) -> bool {
        self.store_only.load(Ordering::SeqCst)
    }

    /// Switches persistent-store-only mode. Publishes when the mode changed.
    pub fn set_store_only(&self, enabled: bool) {
        if self.store_only.swap(enabled, Ordering::SeqCst) != enabled {
            info!(
                "Geo lookups: {}",
                if enabled { "database only" } else { "database + API" }
            );
            self.broadcaster.publish(UpdateKind::Connectivity);
        }
    }

    /// Flips store-only mode and returns the new value.
    pub fn toggle_store_only(&self) -> bool {
        let enabled = !self.store_only();
        self.set_store_only(enabled);
        enabled
    }

    fn can_call_api(&self) -> bool {
        !self.store_only() && self.connectivity.is_online()
    }

    /// Runs the worker until cancellation. Only the first call does anything.
    pub async fn run(self: Arc<Self>) {
        let rx = self
            .queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut rx) = rx else {
            warn!("Geo worker already running");
            return;
        };

        let mut offline: VecDeque<GeoRequest> = VecDeque::new();
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(self.settings.idle_poll, rx.recv()) => res,
            };
            let request = match next {
                Ok(Some(request)) => request,
                Ok(None) => break,
                Err(_) => {
                    if offline.is_empty() || !self.can_call_api() {
                        continue;
                    }
                    match offline.pop_front() {
                        Some(request) => request,
                        None => continue,
                    }
                }
            };

            let step = self.process(&request).await;
            match step {
                Step::Local => {}
                Step::Deferred => offline.push_back(request),
                Step::Api { retry } => {
                    if retry {
                        offline.push_back(request);
                    }
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.settings.api_delay) => {}
                    }
                }
            }
        }
        debug!("Geo worker stopped ({} lookups parked)", offline.len());
    }

    async fn process(&self, request: &GeoRequest) -> Step {
        let ip = request.ip.as_str();

        if let Some(record) = self.load_from_store(ip).await {
            debug!("Geo for {ip} served from database");
            self.finish(ip, GeoEntry::resolved(record));
            return Step::Local;
        }

        if !self.can_call_api() {
            debug!("Deferring geo lookup for {ip} ({}) until online", request.network);
            return Step::Deferred;
        }

        match self.api.lookup(ip).await {
            Ok(LookupOutcome::Found(payload)) => {
                self.api_failures.store(0, Ordering::SeqCst);
                self.connectivity.on_network_success();
                let valid = is_valid_geo_data(&payload);
                let record = GeoRecord::from_payload(ip, payload);
                if valid {
                    self.save_to_store(&record).await;
                } else {
                    debug!("Geo answer for {ip} failed validation; not persisting");
                }
                self.finish(ip, GeoEntry::resolved(record));
                Step::Api { retry: false }
            }
            Ok(LookupOutcome::NotFound) => {
                self.finish(ip, GeoEntry::unavailable());
                Step::Api { retry: false }
            }
            Err(e) => {
                let failures = self.api_failures.fetch_add(1, Ordering::SeqCst) + 1;
                warn!("Geo lookup for {ip} failed ({failures} in a row): {e}");
                self.connectivity.on_network_failure();
                Step::Api { retry: true }
            }
        }
    }

    /// Writes the session entry, releases the IP and notifies observers.
    fn finish(&self, ip: &str, entry: GeoEntry) {
        self.session.insert(ip, entry);
        self.pending.remove(ip);
        self.broadcaster.publish(UpdateKind::GeoUpdate);
    }

    async fn load_from_store(&self, ip: &str) -> Option<GeoRecord> {
        let store = self.store.as_ref()?;
        match store.get(ip).await {
            Ok(record) => record,
            Err(DatabaseError::StoreDisabled) => None,
            Err(e) => {
                warn!("Geo database read failed for {ip}: {e}");
                None
            }
        }
    }

    async fn save_to_store(&self, record: &GeoRecord) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match store.upsert(record).await {
            Ok(()) | Err(DatabaseError::StoreDisabled) => {}
            Err(e) => warn!("Geo database write failed for {}: {e}", record.ip),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Notification;
    use crate::connectivity::{ConnectivitySettings, ConnectivityState, ReachabilityProbe};
    use crate::error_handling::GeoApiError;
    use crate::geo::GeoPayload;
    use crate::storage::StoreStats;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    /// HashMap-backed store so paused-time tests never wait on SQLite threads.
    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, GeoRecord>>,
    }

    #[async_trait]
    impl GeoStore for MemoryStore {
        async fn get(&self, ip: &str) -> Result<Option<GeoRecord>, DatabaseError> {
            Ok(self.rows.lock().expect("rows").get(ip).cloned())
        }
        async fn upsert(&self, record: &GeoRecord) -> Result<(), DatabaseError> {
            self.rows
                .lock()
                .expect("rows")
                .insert(record.ip.clone(), record.clone());
            Ok(())
        }
        async fn bulk_merge_ignoring_conflicts(
            &self,
            records: &[GeoRecord],
        ) -> Result<u64, DatabaseError> {
            let mut rows = self.rows.lock().expect("rows");
            let mut inserted = 0;
            for r in records {
                if !rows.contains_key(&r.ip) {
                    rows.insert(r.ip.clone(), r.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }
        async fn stats(&self) -> Result<StoreStats, DatabaseError> {
            Ok(StoreStats {
                count: self.rows.lock().expect("rows").len() as i64,
                ..Default::default()
            })
        }
        async fn integrity_check(&self) -> Result<bool, DatabaseError> {
            Ok(true)
        }
    }

    #[derive(Clone, Copy)]
    enum Answer {
        Valid,
        Invalid,
        NotFound,
        Down,
    }

    struct MockApi {
        answer: Mutex<Answer>,
        calls: AtomicUsize,
        call_times: Mutex<Vec<tokio::time::Instant>>,
    }

    impl MockApi {
        fn new(answer: Answer) -> Arc<Self> {
            Arc::new(MockApi {
                answer: Mutex::new(answer),
                calls: AtomicUsize::new(0),
                call_times: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl GeoApiClient for MockApi {
        async fn lookup(&self, _ip: &str) -> Result<LookupOutcome, GeoApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.call_times
                .lock()
                .expect("times")
                .push(tokio::time::Instant::now());
            let answer = *self.answer.lock().expect("answer");
            match answer {
                Answer::Valid => Ok(LookupOutcome::Found(GeoPayload {
                    status: Some("success".into()),
                    country: Some("Germany".into()),
                    lat: Some(50.1),
                    lon: Some(8.7),
                    ..Default::default()
                })),
                Answer::Invalid => Ok(LookupOutcome::Found(GeoPayload {
                    status: Some("success".into()),
                    country: Some(String::new()),
                    lat: Some(0.0),
                    lon: Some(0.0),
                    ..Default::default()
                })),
                Answer::NotFound => Ok(LookupOutcome::NotFound),
                Answer::Down => Err(GeoApiError::HttpStatus(503)),
            }
        }
    }

    struct FixedProbe(bool);

    #[async_trait]
    impl ReachabilityProbe for FixedProbe {
        async fn check(&self) -> bool {
            self.0
        }
    }

    struct Harness {
        pipeline: Arc<GeoResolutionPipeline>,
        api: Arc<MockApi>,
        store: Arc<MemoryStore>,
        connectivity: Arc<ConnectivityMonitor>,
        broadcaster: Arc<UpdateBroadcaster>,
    }

    fn harness(answer: Answer, initial: ConnectivityState, probe_ok: bool) -> Harness {
        let cancel = CancellationToken::new();
        let broadcaster = Arc::new(UpdateBroadcaster::new(cancel.clone()));
        let connectivity = ConnectivityMonitor::new(
            initial,
            Arc::new(FixedProbe(probe_ok)),
            Arc::clone(&broadcaster),
            ConnectivitySettings::default(),
            cancel.clone(),
        );
        connectivity.start();
        let api = MockApi::new(answer);
        let store = Arc::new(MemoryStore::default());
        let pipeline = GeoResolutionPipeline::new(
            Some(store.clone() as Arc<dyn GeoStore>),
            api.clone(),
            Arc::clone(&connectivity),
            Arc::clone(&broadcaster),
            GeoSettings::default(),
            cancel,
        );
        tokio::spawn(Arc::clone(&pipeline).run());
        Harness {
            pipeline,
            api,
            store,
            connectivity,
            broadcaster,
        }
    }

    async fn settle(d: Duration) {
        tokio::time::sleep(d).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_under_concurrent_resolve() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);

        let mut tasks = Vec::new();
        for _ in 0..50 {
            let pipeline = Arc::clone(&h.pipeline);
            tasks.push(tokio::spawn(async move {
                pipeline.resolve("8.8.4.4", "ipv4")
            }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.expect("task") {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert!(h.pipeline.pending_count() <= 1);

        settle(Duration::from_secs(3)).await;
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.pipeline.status("8.8.4.4"), GeoStatus::Ok);
        assert!(!h.pipeline.is_pending("8.8.4.4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_hit_skips_api() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);
        let record = GeoRecord {
            ip: "1.1.1.1".into(),
            country: Some("Australia".into()),
            lat: Some(-33.5),
            lon: Some(151.0),
            ..Default::default()
        };
        h.store.upsert(&record).await.expect("upsert");
        let mut sink = h.broadcaster.subscribe();

        assert!(h.pipeline.resolve("1.1.1.1", "ipv4"));
        assert_eq!(
            sink.wait_for_update(Duration::from_secs(5)).await,
            Notification::Update(UpdateKind::GeoUpdate)
        );
        assert_eq!(h.pipeline.entry("1.1.1.1"), GeoEntry::resolved(record));
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_valid_answer_is_persisted() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);
        h.pipeline.resolve("5.5.5.5", "ipv4");
        settle(Duration::from_secs(2)).await;

        assert_eq!(h.pipeline.status("5.5.5.5"), GeoStatus::Ok);
        let stored = h.store.get("5.5.5.5").await.expect("get");
        assert_eq!(stored.and_then(|r| r.country), Some("Germany".to_string()));
        assert!(h.pipeline.api_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_answer_shown_but_not_persisted() {
        let h = harness(Answer::Invalid, ConnectivityState::Green, true);
        h.pipeline.resolve("6.6.6.6", "ipv4");
        settle(Duration::from_secs(2)).await;

        assert_eq!(h.pipeline.status("6.6.6.6"), GeoStatus::Ok);
        assert_eq!(h.store.get("6.6.6.6").await.expect("get"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_marks_unavailable() {
        let h = harness(Answer::NotFound, ConnectivityState::Green, true);
        h.pipeline.resolve("7.7.7.7", "ipv4");
        settle(Duration::from_secs(2)).await;

        assert_eq!(h.pipeline.status("7.7.7.7"), GeoStatus::Unavailable);
        assert!(!h.pipeline.is_pending("7.7.7.7"));
        // Terminal: a second resolve does not enqueue
        assert!(!h.pipeline.resolve("7.7.7.7", "ipv4"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_claim_released_when_lookup_finished_concurrently() {
        let h = harness(Answer::NotFound, ConnectivityState::Green, true);
        // The worker finished 9.9.9.9 between the caller's session check
        // and its claim on the pending set
        h.pipeline.session.insert("9.9.9.9", GeoEntry::unavailable());

        assert!(!h.pipeline.claim("9.9.9.9"));
        assert!(!h.pipeline.is_pending("9.9.9.9"));
        settle(Duration::from_secs(2)).await;
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_defers_then_retries_when_green() {
        // Starts red; the probe succeeds so the monitor turns green after four probes
        let h = harness(Answer::Valid, ConnectivityState::Red, true);
        h.pipeline.resolve("9.9.9.9", "ipv4");
        settle(Duration::from_secs(1)).await;

        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.pipeline.status("9.9.9.9"), GeoStatus::Pending);
        assert!(h.pipeline.is_pending("9.9.9.9"));
        assert!(!h.pipeline.resolve("9.9.9.9", "ipv4"));

        settle(Duration::from_secs(10)).await;
        assert_eq!(h.connectivity.state(), ConnectivityState::Green);
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.pipeline.status("9.9.9.9"), GeoStatus::Ok);
        assert!(!h.pipeline.is_pending("9.9.9.9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_only_mode_defers_and_publishes() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);
        let mut sink = h.broadcaster.subscribe();

        assert!(h.pipeline.toggle_store_only());
        assert_eq!(
            sink.wait_for_update(Duration::from_secs(1)).await,
            Notification::Update(UpdateKind::Connectivity)
        );
        // Setting the same mode again is silent
        h.pipeline.set_store_only(true);
        assert_eq!(
            sink.wait_for_update(Duration::from_secs(1)).await,
            Notification::Keepalive
        );

        h.pipeline.resolve("4.4.4.4", "ipv4");
        settle(Duration::from_secs(3)).await;
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.pipeline.status("4.4.4.4"), GeoStatus::Pending);

        assert!(!h.pipeline.toggle_store_only());
        settle(Duration::from_secs(3)).await;
        assert_eq!(h.pipeline.status("4.4.4.4"), GeoStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_failure_signals_connectivity() {
        let h = harness(Answer::Down, ConnectivityState::Green, false);
        h.pipeline.resolve("3.3.3.3", "ipv4");
        settle(Duration::from_millis(100)).await;

        assert_eq!(h.connectivity.state(), ConnectivityState::Yellow);
        // Left unresolved for retry, not marked unavailable
        assert_eq!(h.pipeline.status("3.3.3.3"), GeoStatus::Pending);
        assert!(h.pipeline.is_pending("3.3.3.3"));
        assert_eq!(h.api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_unavailable_after_five_failures() {
        let h = harness(Answer::Down, ConnectivityState::Green, true);
        for i in 0..5 {
            h.pipeline.resolve(&format!("2.2.2.{i}"), "ipv4");
            // Probe restores green between calls
            settle(Duration::from_secs(10)).await;
        }
        assert!(h.api.calls.load(Ordering::SeqCst) >= 5);
        assert!(!h.pipeline.api_available());

        *h.api.answer.lock().expect("answer") = Answer::Valid;
        h.pipeline.resolve("2.2.2.200", "ipv4");
        settle(Duration::from_secs(30)).await;
        assert!(h.pipeline.api_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_only_between_api_calls() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);
        for i in 0..3 {
            let record = GeoRecord {
                ip: format!("10.1.1.{i}"),
                country: Some("Cached".into()),
                ..Default::default()
            };
            h.store.upsert(&record).await.expect("upsert");
        }

        let start = tokio::time::Instant::now();
        for i in 0..3 {
            h.pipeline.resolve(&format!("10.1.1.{i}"), "ipv4");
        }
        h.pipeline.resolve("20.0.0.1", "ipv4");
        h.pipeline.resolve("20.0.0.2", "ipv4");
        settle(Duration::from_secs(5)).await;

        let times = h.api.call_times.lock().expect("times").clone();
        assert_eq!(times.len(), 2);
        // Store hits cost nothing: the first API call happens right away
        assert!(times[0] - start < Duration::from_millis(100));
        assert!(times[1] - times[0] >= Duration::from_millis(1_500));
    }

    #[tokio::test]
    async fn test_mark_private_is_terminal() {
        let h = harness(Answer::Valid, ConnectivityState::Green, true);
        h.pipeline.mark_private("192.168.1.10");
        assert_eq!(h.pipeline.status("192.168.1.10"), GeoStatus::Private);
        assert!(!h.pipeline.resolve("192.168.1.10", "ipv4"));
        assert_eq!(h.pipeline.cached_count(), 1);
    }
}
