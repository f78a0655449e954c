//! Load-aware concurrency for adaptive batches.
//!
//! The ceiling is `max(1, min(base, floor(base * memory * cpu * jobs)))`, with
//! each factor stepping down as its signal crosses a threshold.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One sample of system load.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemLoad {
    /// Memory in use, percent of total.
    pub memory_percent: f64,
    /// CPU utilization estimate, percent.
    pub cpu_percent: f64,
}

/// Source of system load samples.
pub trait LoadProbe: Send + Sync {
    /// Takes a sample, or `None` if the platform cannot be read.
    fn sample(&self) -> Option<SystemLoad>;
}

/// Reads memory and load average from `/proc`.
///
/// CPU is estimated as the one-minute load average over available cores.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsProbe;

impl LoadProbe for ProcfsProbe {
    #[cfg(target_os = "linux")]
    fn sample(&self) -> Option<SystemLoad> {
        use procfs::Current;

        let meminfo = match procfs::Meminfo::current() {
            Ok(meminfo) => meminfo,
            Err(e) => {
                warn!(error = %e, "Failed to read /proc/meminfo");
                return None;
            }
        };
        let loadavg = match procfs::LoadAverage::current() {
            Ok(loadavg) => loadavg,
            Err(e) => {
                warn!(error = %e, "Failed to read /proc/loadavg");
                return None;
            }
        };

        if meminfo.mem_total == 0 {
            return None;
        }
        let available = meminfo.mem_available.unwrap_or(meminfo.mem_free);
        let used = meminfo.mem_total.saturating_sub(available);
        let memory_percent = used as f64 / meminfo.mem_total as f64 * 100.0;

        let cores = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);
        let cpu_percent = (f64::from(loadavg.one) / cores as f64 * 100.0).min(100.0);

        Some(SystemLoad { memory_percent, cpu_percent })
    }

    #[cfg(not(target_os = "linux"))]
    fn sample(&self) -> Option<SystemLoad> {
        None
    }
}

/// Probe that always reports the same load.
#[derive(Debug, Clone, Copy)]
pub struct FixedLoad(pub SystemLoad);

impl LoadProbe for FixedLoad {
    fn sample(&self) -> Option<SystemLoad> {
        Some(self.0)
    }
}

/// Memory pressure factor.
#[must_use]
pub fn memory_factor(memory_percent: f64) -> f64 {
    if memory_percent > 70.0 {
        0.5
    } else if memory_percent > 50.0 {
        0.7
    } else {
        1.0
    }
}

/// CPU pressure factor.
#[must_use]
pub fn cpu_factor(cpu_percent: f64) -> f64 {
    if cpu_percent > 80.0 {
        0.6
    } else if cpu_percent > 60.0 {
        0.8
    } else {
        1.0
    }
}

/// Active-job pressure factor.
#[must_use]
pub const fn job_factor(active_jobs: usize) -> f64 {
    if active_jobs > 5 {
        0.7
    } else if active_jobs > 3 {
        0.85
    } else {
        1.0
    }
}

/// Concurrency ceiling for an adaptive batch.
///
/// Without a load sample, memory and CPU contribute a factor of `1.0`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn effective_concurrency(base: usize, load: Option<SystemLoad>, active_jobs: usize) -> usize {
    let (memory, cpu) =
        load.map_or((1.0, 1.0), |l| (memory_factor(l.memory_percent), cpu_factor(l.cpu_percent)));
    let scaled = (base as f64 * memory * cpu * job_factor(active_jobs)).floor() as usize;
    scaled.min(base).max(1)
}

/// Periodically samples system load and keeps the latest reading.
pub struct ResourceMonitor {
    probe: Arc<dyn LoadProbe>,
    latest: RwLock<Option<SystemLoad>>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor").finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    /// Creates a monitor over a probe.
    #[must_use]
    pub fn new(probe: Arc<dyn LoadProbe>) -> Self {
        Self { probe, latest: RwLock::new(None) }
    }

    /// The most recent sample.
    pub async fn latest(&self) -> Option<SystemLoad> {
        *self.latest.read().await
    }

    /// Takes a sample now and stores it.
    pub async fn sample_now(&self) -> Option<SystemLoad> {
        let load = self.probe.sample();
        if load.is_some() {
            *self.latest.write().await = load;
        }
        load
    }

    /// The latest sample, taking one if none exists yet.
    pub async fn current(&self) -> Option<SystemLoad> {
        match self.latest().await {
            Some(load) => Some(load),
            None => self.sample_now().await,
        }
    }

    /// Spawns the sampling loop. It exits when `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Resource monitor started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(load) = self.sample_now().await {
                            debug!(
                                memory_percent = load.memory_percent,
                                cpu_percent = load.cpu_percent,
                                "Sampled system load"
                            );
                        }
                    }
                }
            }
            info!("Resource monitor stopped");
        })
    }
}
