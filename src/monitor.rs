//! The monitor service: builds every component, runs their loops, and exposes
//! read access for consumers.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use log::{error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::{NotificationSink, UpdateBroadcaster};
use crate::config::{Config, GEO_API_TIMEOUT, PRICE_TIMEOUT, PROBE_TIMEOUT};
use crate::connectivity::{
    ConnectivityMonitor, ConnectivitySettings, ConnectivityState, HttpProbe, ReachabilityProbe,
};
use crate::error_handling::InitializationError;
use crate::geo::{GeoApiClient, GeoResolutionPipeline, GeoSettings, IpApiClient};
use crate::initialization::{init_client, init_probe_client};
use crate::peers::{
    AddrManCache, AddressListProvider, BitcoinCli, ChangeEvent, PeerChangeTracker,
    PeerInfoProvider, PeerView, TrackerSettings,
};
use crate::price::{PriceQuote, PriceTracker};
use crate::stats::{ProcFs, StatsSampler, StatsSnapshot, SystemMetricsSource};
use crate::storage::{
    cleanup_temp_files, init_db_pool_with_path, run_migrations, update_geo_database, GeoStore,
    SqliteGeoStore, StoreStats,
};

/// External collaborators the monitor talks to.
pub struct Collaborators {
    pub peers: Arc<dyn PeerInfoProvider>,
    pub addresses: Arc<dyn AddressListProvider>,
    pub probe: Arc<dyn ReachabilityProbe>,
    pub geo_api: Arc<dyn GeoApiClient>,
    pub metrics: Arc<dyn SystemMetricsSource>,
    /// Client for the price API and the bulk dataset download
    pub http: reqwest::Client,
}

impl Collaborators {
    /// bitcoin-cli, HTTP probe, ip-api.com and procfs, as configured.
    ///
    /// # Errors
    ///
    /// Returns `InitializationError::HttpClientError` if an HTTP client cannot
    /// be built.
    pub fn from_config(config: &Config) -> Result<Self, InitializationError> {
        let cli = Arc::new(BitcoinCli::from_config(config));
        Ok(Collaborators {
            peers: cli.clone(),
            addresses: cli,
            probe: Arc::new(HttpProbe::new(
                init_probe_client(PROBE_TIMEOUT)?,
                &config.probe_url,
            )),
            geo_api: Arc::new(IpApiClient::new(
                init_client(GEO_API_TIMEOUT)?,
                &config.geo_api_url,
            )),
            metrics: Arc::new(ProcFs::default()),
            http: init_client(PRICE_TIMEOUT)?,
        })
    }
}

/// Handle to a running monitor.
pub struct Monitor {
    config: Config,
    cancel: CancellationToken,
    broadcaster: Arc<UpdateBroadcaster>,
    connectivity: Arc<ConnectivityMonitor>,
    geo: Arc<GeoResolutionPipeline>,
    store: Option<Arc<SqliteGeoStore>>,
    addrman: Arc<AddrManCache>,
    tracker: Arc<PeerChangeTracker>,
    stats: Arc<StatsSampler>,
    price: Arc<PriceTracker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    /// Starts a monitor against the real node and services named in `config`.
    ///
    /// # Errors
    ///
    /// Fails only when an HTTP client cannot be built. A persistent store that
    /// cannot be opened is logged and the monitor runs without it.
    pub async fn start(config: Config) -> Result<Self, InitializationError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::start_with(config, collaborators).await)
    }

    /// Starts a monitor with the given collaborators.
    pub async fn start_with(config: Config, collaborators: Collaborators) -> Self {
        let cancel = CancellationToken::new();
        let broadcaster = Arc::new(UpdateBroadcaster::new(cancel.clone()));

        cleanup_temp_files(&config.tmp_dir());
        let store = if config.no_geo_db {
            info!("Persistent geo database disabled");
            None
        } else {
            open_store(&config).await
        };

        let initial = if config.offline_start {
            info!("Offline start: connectivity assumed down until probes succeed");
            ConnectivityState::Red
        } else {
            ConnectivityState::Green
        };
        let connectivity = ConnectivityMonitor::new(
            initial,
            collaborators.probe,
            Arc::clone(&broadcaster),
            ConnectivitySettings::default(),
            cancel.clone(),
        );
        connectivity.start();

        let geo = GeoResolutionPipeline::new(
            store.clone().map(|s| s as Arc<dyn GeoStore>),
            collaborators.geo_api,
            Arc::clone(&connectivity),
            Arc::clone(&broadcaster),
            GeoSettings {
                api_delay: config.geo_api_delay(),
                ..Default::default()
            },
            cancel.clone(),
        );
        geo.set_store_only(config.geo_db_only);

        let addrman = Arc::new(AddrManCache::new(collaborators.addresses));
        addrman.refresh().await;

        let tracker = PeerChangeTracker::new(
            collaborators.peers,
            Arc::clone(&addrman),
            Arc::clone(&geo),
            Arc::clone(&broadcaster),
            TrackerSettings {
                interval: config.refresh_interval(),
                addrman_refresh_every: config.addrman_refresh_every,
                ..Default::default()
            },
            cancel.clone(),
        );

        let stats = Arc::new(StatsSampler::new(
            collaborators.metrics,
            config.stats_interval(),
            cancel.clone(),
        ));

        let price = Arc::new(PriceTracker::new(
            collaborators.http.clone(),
            &config.price_api_url,
            Arc::clone(&connectivity),
        ));

        let mut tasks = vec![
            tokio::spawn(Arc::clone(&geo).run()),
            tokio::spawn(Arc::clone(&tracker).run()),
            tokio::spawn(Arc::clone(&stats).run()),
        ];
        if config.price_interval_secs > 0 {
            tasks.push(tokio::spawn(Arc::clone(&price).run(
                config.price_currency.clone(),
                std::time::Duration::from_secs(config.price_interval_secs),
                cancel.clone(),
            )));
        }
        if let (true, Some(store)) = (config.update_geo_db, store.clone()) {
            tasks.push(spawn_dataset_update(
                &config,
                collaborators.http,
                store,
                cancel.clone(),
            ));
        }

        info!(
            "Monitor started (addrman: {} addresses, geo db: {})",
            addrman.len(),
            if store.is_some() { "on" } else { "off" }
        );

        Monitor {
            config,
            cancel,
            broadcaster,
            connectivity,
            geo,
            store,
            addrman,
            tracker,
            stats,
            price,
            tasks: Mutex::new(tasks),
        }
    }

    /// Stops every loop and waits for them to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down monitor");
        self.cancel.cancel();
        let tasks: Vec<_> = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!("Background task ended abnormally: {e}");
            }
        }
        self.connectivity.join().await;
        if let Some(store) = &self.store {
            store.pool().close().await;
        }
    }

    /// Registers an observer for update notifications.
    pub fn subscribe(&self) -> NotificationSink {
        self.broadcaster.subscribe()
    }

    /// Current peers joined with their location and addrman membership.
    pub fn peers(&self) -> Vec<PeerView> {
        let now = Utc::now().timestamp();
        self.tracker
            .snapshot()
            .iter()
            .map(|peer| {
                let ip = peer.ip();
                PeerView::build(peer, self.geo.entry(ip), self.addrman.contains(ip), now)
            })
            .collect()
    }

    pub fn recent_changes(&self) -> Vec<ChangeEvent> {
        self.tracker.recent_changes()
    }

    pub fn connectivity_state(&self) -> ConnectivityState {
        self.connectivity.state()
    }

    pub fn api_available(&self) -> bool {
        self.geo.api_available()
    }

    pub fn store_only(&self) -> bool {
        self.geo.store_only()
    }

    /// Flips persistent-store-only mode and returns the new value.
    pub fn toggle_store_only(&self) -> bool {
        self.geo.toggle_store_only()
    }

    pub fn system_stats(&self) -> Option<StatsSnapshot> {
        self.stats.latest()
    }

    /// Fetches the spot price now, falling back to the last known quote.
    pub async fn price(&self, currency: &str) -> Option<PriceQuote> {
        self.price.fetch(currency).await
    }

    pub fn last_price_error(&self) -> Option<String> {
        self.price.last_error()
    }

    /// Persistent store row count and age range, `None` when disabled or
    /// unreadable.
    pub async fn store_stats(&self) -> Option<StoreStats> {
        let store = self.store.as_ref()?;
        match store.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("Failed to read geo database stats: {e}");
                None
            }
        }
    }

    pub fn geo(&self) -> &Arc<GeoResolutionPipeline> {
        &self.geo
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Opens, migrates and checks the persistent store. Failures disable it.
async fn open_store(config: &Config) -> Option<Arc<SqliteGeoStore>> {
    let pool = match init_db_pool_with_path(&config.geo_db_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Geo database unavailable, continuing without it: {e}");
            return None;
        }
    };
    if let Err(e) = run_migrations(&pool).await {
        error!("Geo database migration failed, continuing without it: {e:#}");
        pool.close().await;
        return None;
    }
    let store = Arc::new(SqliteGeoStore::new(pool));
    match store.integrity_check().await {
        Ok(true) => {}
        Ok(false) => warn!(
            "Geo database {} failed its integrity check",
            config.geo_db_path.display()
        ),
        Err(e) => warn!("Geo database integrity check could not run: {e}"),
    }
    Some(store)
}

fn spawn_dataset_update(
    config: &Config,
    client: reqwest::Client,
    store: Arc<SqliteGeoStore>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let url = config.geo_dataset_url.clone();
    let tmp_dir = config.tmp_dir();
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                cleanup_temp_files(&tmp_dir);
            }
            result = update_geo_database(&client, &url, &tmp_dir, store.as_ref()) => {
                match result {
                    Ok(summary) => info!(
                        "Geo database updated: {} new of {} rows ({} total)",
                        summary.new_rows, summary.imported_rows, summary.total_rows
                    ),
                    Err(e) => warn!("Geo database update failed: {e}"),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcaster::Notification;
    use crate::error_handling::{GeoApiError, ProviderError};
    use crate::geo::{GeoPayload, GeoStatus, LookupOutcome};
    use crate::peers::PeerRecord;
    use crate::stats::{CpuJiffies, MemoryInfo, NetworkCounters};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::time::Duration;

    struct StaticPeers;

    #[async_trait]
    impl PeerInfoProvider for StaticPeers {
        async fn list_peers(&self) -> Result<Vec<PeerRecord>, ProviderError> {
            Ok(vec![
                PeerRecord {
                    id: 1,
                    addr: "203.0.113.10:8333".into(),
                    network: Some("ipv4".into()),
                    ..Default::default()
                },
                PeerRecord {
                    id: 2,
                    addr: "abcdef.onion:8333".into(),
                    network: Some("onion".into()),
                    ..Default::default()
                },
            ])
        }
    }

    #[async_trait]
    impl AddressListProvider for StaticPeers {
        async fn list_addresses(&self) -> Result<HashSet<String>, ProviderError> {
            Ok(HashSet::from(["203.0.113.10".to_string()]))
        }
    }

    struct Up;

    #[async_trait]
    impl ReachabilityProbe for Up {
        async fn check(&self) -> bool {
            true
        }
    }

    struct Berlin;

    #[async_trait]
    impl GeoApiClient for Berlin {
        async fn lookup(&self, _ip: &str) -> Result<LookupOutcome, GeoApiError> {
            Ok(LookupOutcome::Found(GeoPayload {
                status: Some("success".into()),
                country: Some("Germany".into()),
                country_code: Some("DE".into()),
                city: Some("Berlin".into()),
                lat: Some(52.52),
                lon: Some(13.40),
                ..Default::default()
            }))
        }
    }

    struct IdleHost;

    impl SystemMetricsSource for IdleHost {
        fn read_network_counters(&self) -> std::io::Result<NetworkCounters> {
            Ok(NetworkCounters::default())
        }
        fn read_cpu_jiffies(&self) -> std::io::Result<CpuJiffies> {
            Ok(CpuJiffies::default())
        }
        fn read_memory(&self) -> std::io::Result<MemoryInfo> {
            Ok(MemoryInfo {
                total_kb: 1024,
                available_kb: 512,
            })
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            peers: Arc::new(StaticPeers),
            addresses: Arc::new(StaticPeers),
            probe: Arc::new(Up),
            geo_api: Arc::new(Berlin),
            metrics: Arc::new(IdleHost),
            http: reqwest::Client::new(),
        }
    }

    fn test_config(dir: &tempfile::TempDir) -> Config {
        Config {
            geo_db_path: dir.path().join("geo.db"),
            geo_api_delay_ms: 0,
            price_interval_secs: 0,
            ..Default::default()
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_peers_are_located_and_persisted() {
        let dir = tempfile::tempdir().expect("tempdir");
        let monitor = Monitor::start_with(test_config(&dir), collaborators()).await;

        wait_until(|| {
            monitor
                .peers()
                .iter()
                .any(|p| p.id == 1 && p.location_status == GeoStatus::Ok)
        })
        .await;

        let peers = monitor.peers();
        let clearnet = peers.iter().find(|p| p.id == 1).expect("peer 1");
        assert_eq!(clearnet.location, "Berlin, DE");
        assert!(clearnet.in_addrman);
        let onion = peers.iter().find(|p| p.id == 2).expect("peer 2");
        assert_eq!(onion.location_status, GeoStatus::Private);

        let stats = monitor.store_stats().await.expect("store stats");
        assert_eq!(stats.count, 1);
        assert_eq!(monitor.connectivity_state(), ConnectivityState::Green);

        monitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_store_only_toggle_and_notifications() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            no_geo_db: true,
            geo_db_only: true,
            ..test_config(&dir)
        };
        let monitor = Monitor::start_with(config, collaborators()).await;
        assert!(monitor.store_only());
        assert!(monitor.store_stats().await.is_none());

        let mut sink = monitor.subscribe();
        assert!(!monitor.toggle_store_only());
        // Coalesced with peer updates, but something arrives promptly
        assert!(matches!(
            sink.wait_for_update(Duration::from_secs(2)).await,
            Notification::Update(_)
        ));

        monitor.shutdown().await;
        assert_eq!(
            sink.wait_for_update(Duration::from_secs(1)).await,
            Notification::Closed
        );
    }

    #[tokio::test]
    async fn test_offline_start_is_red() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            no_geo_db: true,
            offline_start: true,
            ..test_config(&dir)
        };
        let mut collab = collaborators();
        collab.probe = Arc::new(Down);
        let monitor = Monitor::start_with(config, collab).await;

        assert_eq!(monitor.connectivity_state(), ConnectivityState::Red);
        // Lookups wait for connectivity
        wait_until(|| !monitor.peers().is_empty()).await;
        assert!(monitor.geo().is_pending("203.0.113.10"));

        monitor.shutdown().await;
    }

    struct Down;

    #[async_trait]
    impl ReachabilityProbe for Down {
        async fn check(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_system_stats_published() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            no_geo_db: true,
            stats_interval_ms: 20,
            ..test_config(&dir)
        };
        let monitor = Monitor::start_with(config, collaborators()).await;
        wait_until(|| monitor.system_stats().is_some()).await;
        assert_eq!(
            monitor.system_stats().and_then(|s| s.mem_pct),
            Some(50.0)
        );
        monitor.shutdown().await;
    }
}
