//! Internet connectivity monitoring.
//!
//! Every outbound network call reports its outcome here. The first failure
//! flips the state to yellow and starts a background probe loop; the loop
//! keeps probing while not green, escalates to red after a sustained outage,
//! and exits once enough consecutive successes restore green.
//!
//! Probe cadence:
//! - while the outage is younger than the throttle threshold, one probe per
//!   probe timeout
//! - afterwards, one probe per throttled interval

mod probe;
mod state;

pub use probe::{HttpProbe, ReachabilityProbe};
pub use state::{ConnectivityState, ConnectivityTracker, Transition};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::broadcaster::{UpdateBroadcaster, UpdateKind};
use crate::config::{
    CONSECUTIVE_SUCCESSES_FOR_GREEN, PROBE_THROTTLED_INTERVAL, PROBE_THROTTLE_AFTER, PROBE_TIMEOUT,
    YELLOW_TO_RED_AFTER,
};

/// Thresholds and cadence for the connectivity monitor.
#[derive(Debug, Clone, Copy)]
pub struct ConnectivitySettings {
    pub required_successes: u32,
    pub red_after: Duration,
    /// Probe spacing while the outage is young; also bounds one probe
    pub probe_interval: Duration,
    pub throttle_after: Duration,
    pub throttled_interval: Duration,
}

impl Default for ConnectivitySettings {
    fn default() -> Self {
        ConnectivitySettings {
            required_successes: CONSECUTIVE_SUCCESSES_FOR_GREEN,
            red_after: YELLOW_TO_RED_AFTER,
            probe_interval: PROBE_TIMEOUT,
            throttle_after: PROBE_THROTTLE_AFTER,
            throttled_interval: PROBE_THROTTLED_INTERVAL,
        }
    }
}

/// Shared connectivity state plus its self-terminating probe loop.
pub struct ConnectivityMonitor {
    tracker: Mutex<ConnectivityTracker>,
    probe_running: AtomicBool,
    probe_task: Mutex<Option<JoinHandle<()>>>,
    probe: Arc<dyn ReachabilityProbe>,
    broadcaster: Arc<UpdateBroadcaster>,
    settings: ConnectivitySettings,
    cancel: CancellationToken,
}

impl ConnectivityMonitor {
    /// Creates a monitor in `initial` state.
    ///
    /// Starting in a non-green state (offline start) opens an outage
    /// immediately; call [`ConnectivityMonitor::start`] to launch the probe
    /// loop for it.
    pub fn new(
        initial: ConnectivityState,
        probe: Arc<dyn ReachabilityProbe>,
        broadcaster: Arc<UpdateBroadcaster>,
        settings: ConnectivitySettings,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let tracker = ConnectivityTracker::with_thresholds(
            initial,
            Instant::now(),
            settings.required_successes,
            settings.red_after,
        );
        Arc::new(ConnectivityMonitor {
            tracker: Mutex::new(tracker),
            probe_running: AtomicBool::new(false),
            probe_task: Mutex::new(None),
            probe,
            broadcaster,
            settings,
            cancel,
        })
    }

    /// Starts the probe loop if the monitor is not green.
    pub fn start(self: &Arc<Self>) {
        if self.state() != ConnectivityState::Green {
            self.ensure_probe_loop();
        }
    }

    pub fn state(&self) -> ConnectivityState {
        self.lock_tracker().state()
    }

    /// True when outbound lookups should be attempted.
    pub fn is_online(&self) -> bool {
        self.state() == ConnectivityState::Green
    }

    /// True while the probe loop is alive.
    pub fn is_probing(&self) -> bool {
        self.probe_running.load(Ordering::SeqCst)
    }

    /// Records a failed outbound network call.
    pub fn on_network_failure(self: &Arc<Self>) {
        let transition = self.lock_tracker().record_failure(Instant::now());
        self.announce(transition);
        if self.state() != ConnectivityState::Green {
            self.ensure_probe_loop();
        }
    }

    /// Records a successful outbound network call.
    pub fn on_network_success(&self) {
        let transition = self.lock_tracker().record_success();
        self.announce(transition);
    }

    /// Waits for the probe loop to exit after cancellation.
    pub async fn join(&self) {
        let handle = self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("Connectivity probe task ended abnormally: {e}");
            }
        }
    }

    fn lock_tracker(&self) -> MutexGuard<'_, ConnectivityTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes a transition. Called with the tracker lock released.
    fn announce(&self, transition: Option<Transition>) {
        if let Some(Transition { from, to }) = transition {
            match to {
                ConnectivityState::Green => log::info!("Internet connectivity restored ({from} -> {to})"),
                _ => log::warn!("Internet connectivity degraded ({from} -> {to})"),
            }
            self.broadcaster.publish(UpdateKind::Connectivity);
        }
    }

    fn ensure_probe_loop(self: &Arc<Self>) {
        if self.cancel.is_cancelled() || self.probe_running.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("Starting connectivity probe loop");
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                this.probe_loop().await;
                this.probe_running.store(false, Ordering::SeqCst);
                // A failure may have landed between the last green check and
                // clearing the flag; pick it up instead of leaving no prober.
                if this.cancel.is_cancelled() || this.state() == ConnectivityState::Green {
                    break;
                }
                if this.probe_running.swap(true, Ordering::SeqCst) {
                    break;
                }
            }
            log::debug!("Connectivity probe loop exited");
        });
        *self
            .probe_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    async fn probe_loop(&self) {
        loop {
            if self.cancel.is_cancelled() || self.state() == ConnectivityState::Green {
                return;
            }
            let started = Instant::now();

            let reachable = tokio::select! {
                _ = self.cancel.cancelled() => return,
                res = tokio::time::timeout(self.settings.probe_interval, self.probe.check()) => {
                    res.unwrap_or(false)
                }
            };

            let transition = {
                let mut tracker = self.lock_tracker();
                let now = Instant::now();
                let outcome = if reachable {
                    tracker.record_success()
                } else {
                    tracker.record_failure(now)
                };
                outcome.or_else(|| tracker.escalate(now))
            };
            self.announce(transition);

            let delay = match self.lock_tracker().outage_duration(Instant::now()) {
                None => return,
                Some(outage) if outage > self.settings.throttle_after => {
                    self.settings.throttled_interval
                }
                Some(_) => self.settings.probe_interval,
            };
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep_until(started + delay) => {}
            }
        }
    }
}
