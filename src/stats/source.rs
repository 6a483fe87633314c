//! Raw OS counter reads.

use std::io;
use std::path::{Path, PathBuf};

/// Byte totals summed over every non-loopback interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

/// Aggregate CPU jiffies since boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuJiffies {
    /// idle + iowait
    pub idle: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemoryInfo {
    pub fn used_kb(&self) -> u64 {
        self.total_kb.saturating_sub(self.available_kb)
    }

    /// Used memory in percent, `None` when the total is unknown.
    pub fn used_pct(&self) -> Option<f64> {
        (self.total_kb > 0).then(|| self.used_kb() as f64 / self.total_kb as f64 * 100.0)
    }
}

/// Raw counter reads. No smoothing, no deltas.
pub trait SystemMetricsSource: Send + Sync {
    fn read_network_counters(&self) -> io::Result<NetworkCounters>;
    fn read_cpu_jiffies(&self) -> io::Result<CpuJiffies>;
    fn read_memory(&self) -> io::Result<MemoryInfo>;
}

/// Reads `/proc/net/dev`, `/proc/stat` and `/proc/meminfo`.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        ProcFs::new("/proc")
    }
}

impl ProcFs {
    /// Reads from `root` instead of `/proc`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ProcFs { root: root.into() }
    }

    fn read(&self, relative: impl AsRef<Path>) -> io::Result<String> {
        std::fs::read_to_string(self.root.join(relative))
    }
}

impl SystemMetricsSource for ProcFs {
    fn read_network_counters(&self) -> io::Result<NetworkCounters> {
        Ok(parse_net_dev(&self.read("net/dev")?))
    }

    fn read_cpu_jiffies(&self) -> io::Result<CpuJiffies> {
        parse_stat(&self.read("stat")?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "malformed cpu line"))
    }

    fn read_memory(&self) -> io::Result<MemoryInfo> {
        parse_meminfo(&self.read("meminfo")?)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "MemTotal missing"))
    }
}

pub(crate) fn parse_net_dev(content: &str) -> NetworkCounters {
    let mut counters = NetworkCounters::default();
    for line in content.lines() {
        let Some((iface, data)) = line.trim().split_once(':') else {
            continue;
        };
        if iface.trim() == "lo" {
            continue;
        }
        let fields: Vec<&str> = data.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        if let (Ok(rx), Ok(tx)) = (fields[0].parse::<u64>(), fields[8].parse::<u64>()) {
            counters.rx_bytes += rx;
            counters.tx_bytes += tx;
        }
    }
    counters
}

pub(crate) fn parse_stat(content: &str) -> Option<CpuJiffies> {
    let line = content.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    let values = fields
        .take(8)
        .map(str::parse::<u64>)
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if values.len() < 8 {
        return None;
    }
    Some(CpuJiffies {
        idle: values[3] + values[4],
        total: values.iter().sum(),
    })
}

pub(crate) fn parse_meminfo(content: &str) -> Option<MemoryInfo> {
    let field = |name: &str| {
        content
            .lines()
            .find_map(|line| line.strip_prefix(name))
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|value| value.parse::<u64>().ok())
    };
    Some(MemoryInfo {
        total_kb: field("MemTotal:")?,
        available_kb: field("MemAvailable:").unwrap_or(0),
    })
}
