//! Smoothed host metrics.
//!
//! [`StatsSampler`] reads raw counters on a short tick, turns them into rates
//! against the previous sample, smooths each quantity with its own
//! [`DualEma`] and publishes one snapshot. No history is kept.

mod ema;
mod source;

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use ema::DualEma;
pub use source::{CpuJiffies, MemoryInfo, NetworkCounters, ProcFs, SystemMetricsSource};

/// Latest smoothed values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    /// Received bytes per second
    pub rx_bps: f64,
    /// Sent bytes per second
    pub tx_bps: f64,
    pub cpu_pct: Option<f64>,
    pub mem_pct: Option<f64>,
    pub mem_used_mb: Option<u64>,
    pub mem_total_mb: Option<u64>,
    /// Unix milliseconds of the sample
    pub timestamp_ms: i64,
}

/// Previous raw readings and the smoothers.
struct SamplerState {
    prev_net: Option<(NetworkCounters, Instant)>,
    prev_cpu: Option<CpuJiffies>,
    last_sample: Option<Instant>,
    /// Last published (rx, tx) rates, reused when the counters cannot be read
    net_rates: (f64, f64),
    net_rx: DualEma,
    net_tx: DualEma,
    cpu: DualEma,
    mem: DualEma,
}

impl Default for SamplerState {
    fn default() -> Self {
        SamplerState {
            prev_net: None,
            prev_cpu: None,
            last_sample: None,
            net_rates: (0.0, 0.0),
            net_rx: DualEma::network(),
            net_tx: DualEma::network(),
            cpu: DualEma::cpu(),
            mem: DualEma::memory(),
        }
    }
}

pub struct StatsSampler {
    source: Arc<dyn SystemMetricsSource>,
    state: Mutex<SamplerState>,
    snapshot: RwLock<Option<StatsSnapshot>>,
    interval: Duration,
    cancel: CancellationToken,
}

impl StatsSampler {
    pub fn new(
        source: Arc<dyn SystemMetricsSource>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        StatsSampler {
            source,
            state: Mutex::new(SamplerState::default()),
            snapshot: RwLock::new(None),
            interval,
            cancel,
        }
    }

    /// The most recent snapshot, `None` before the first sample.
    pub fn latest(&self) -> Option<StatsSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Samples until cancelled.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => self.sample(),
            }
        }
        debug!("Stats sampler stopped");
    }

    /// Takes one sample and publishes the resulting snapshot.
    pub fn sample(&self) {
        let now = Instant::now();
        let network = self.source.read_network_counters();
        let cpu = self.source.read_cpu_jiffies();
        let memory = self.source.read_memory();

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        // Nominal tick on the first sample, measured spacing afterwards
        let dt = state
            .last_sample
            .map(|last| now.saturating_duration_since(last).as_secs_f64())
            .filter(|dt| *dt > 0.0)
            .unwrap_or_else(|| self.interval.as_secs_f64());
        state.last_sample = Some(now);

        let mut snapshot = StatsSnapshot {
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            ..Default::default()
        };

        match network {
            Ok(counters) => {
                if let Some((prev, at)) = state.prev_net {
                    let elapsed = now.saturating_duration_since(at).as_secs_f64();
                    if elapsed > 0.0 {
                        let rx = counters.rx_bytes.saturating_sub(prev.rx_bytes) as f64 / elapsed;
                        let tx = counters.tx_bytes.saturating_sub(prev.tx_bytes) as f64 / elapsed;
                        state.net_rates = (
                            round1(state.net_rx.update(rx, dt)),
                            round1(state.net_tx.update(tx, dt)),
                        );
                    }
                }
                state.prev_net = Some((counters, now));
            }
            Err(e) => trace!("Network counters unavailable, keeping last rates: {e}"),
        }
        (snapshot.rx_bps, snapshot.tx_bps) = state.net_rates;

        match cpu {
            Ok(cpu) => {
                if let Some(prev) = state.prev_cpu {
                    let d_total = cpu.total.saturating_sub(prev.total);
                    if d_total > 0 {
                        let d_idle = cpu.idle.saturating_sub(prev.idle);
                        let busy = 100.0 * (1.0 - d_idle as f64 / d_total as f64);
                        snapshot.cpu_pct = Some(round1(state.cpu.update(busy, dt)));
                    }
                }
                state.prev_cpu = Some(cpu);
            }
            Err(e) => trace!("CPU jiffies unavailable: {e}"),
        }

        match memory {
            Ok(mem) => {
                if let Some(pct) = mem.used_pct() {
                    snapshot.mem_pct = Some(round1(state.mem.update(pct, dt)));
                    snapshot.mem_total_mb = Some((mem.total_kb as f64 / 1024.0).round() as u64);
                    snapshot.mem_used_mb = Some((mem.used_kb() as f64 / 1024.0).round() as u64);
                }
            }
            Err(e) => trace!("Memory info unavailable: {e}"),
        }
        drop(state);

        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
