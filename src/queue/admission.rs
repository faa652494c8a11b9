//! # Load-aware admission throttling.
//!
//! On submit the orchestrator asks [`Admission::admit`] whether the system is
//! overloaded. Overload means CPU utilisation at or above
//! [`ThrottleConfig::cpu_threshold`] **or** in-flight executions at or above
//! [`ThrottleConfig::max_in_flight`]. Under overload, `Normal`/`Low` envelopes
//! are deferred by [`ThrottleConfig::defer`]; `Critical`/`High` pass unchanged.
//! Nothing is ever rejected.
//!
//! CPU utilisation comes from a [`LoadProbe`]. [`SystemLoadProbe`] samples it
//! with `sysinfo`, reusing the last sample inside the minimum refresh interval.

use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use parking_lot::Mutex;
use serde::Deserialize;
use sysinfo::{MINIMUM_CPU_UPDATE_INTERVAL, System};
use tokio::time::Instant;

use crate::tasks::ScheduledTask;

/// Thresholds for admission throttling.
///
/// ## Sentinels
/// - `cpu_threshold <= 0` → CPU is not considered
/// - `max_in_flight = 0`  → in-flight count is not considered
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    /// CPU utilisation (percent, 0–100) at which throttling starts.
    pub cpu_threshold: f32,
    /// In-flight executions at which throttling starts.
    pub max_in_flight: usize,
    /// How far a throttled envelope's `scheduled_at` is pushed out (seconds in config).
    #[serde(deserialize_with = "crate::core::config::duration_secs")]
    pub defer: Duration,
}

impl Default for ThrottleConfig {
    /// `cpu_threshold = 90%`, `max_in_flight = 0` (off), `defer = 1s`.
    fn default() -> Self {
        Self {
            cpu_threshold: 90.0,
            max_in_flight: 0,
            defer: Duration::from_secs(1),
        }
    }
}

impl ThrottleConfig {
    /// Config with both thresholds disabled.
    pub fn disabled() -> Self {
        Self {
            cpu_threshold: 0.0,
            max_in_flight: 0,
            ..Self::default()
        }
    }

    /// Returns `true` if CPU sampling is needed at all.
    #[inline]
    pub fn watches_cpu(&self) -> bool {
        self.cpu_threshold > 0.0
    }

    /// Returns `true` if `sample` exceeds any enabled threshold.
    pub fn is_overloaded(&self, sample: &LoadSample) -> bool {
        let cpu = self.watches_cpu()
            && sample
                .cpu_percent
                .is_some_and(|cpu| cpu >= self.cpu_threshold);
        let busy = self.max_in_flight > 0 && sample.in_flight >= self.max_in_flight;
        cpu || busy
    }
}

/// One observation of system load.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LoadSample {
    /// Global CPU utilisation in percent, `None` until a sample exists.
    pub cpu_percent: Option<f32>,
    /// Executions currently running across all pools.
    pub in_flight: usize,
}

/// Source of CPU utilisation samples.
pub trait LoadProbe: Send + Sync + 'static {
    /// Current global CPU utilisation in percent, if known.
    fn cpu_percent(&self) -> Option<f32>;
}

/// [`LoadProbe`] backed by `sysinfo`.
pub struct SystemLoadProbe {
    state: Mutex<ProbeState>,
}

struct ProbeState {
    system: System,
    refreshed_at: Option<StdInstant>,
    last: Option<f32>,
}

impl SystemLoadProbe {
    /// Creates a probe; the first call only establishes a baseline.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProbeState {
                system: System::new(),
                refreshed_at: None,
                last: None,
            }),
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadProbe for SystemLoadProbe {
    fn cpu_percent(&self) -> Option<f32> {
        let mut state = self.state.lock();
        let now = StdInstant::now();
        let refreshed_at = state.refreshed_at;
        match refreshed_at {
            Some(at) if now.duration_since(at) < MINIMUM_CPU_UPDATE_INTERVAL => {
                return state.last;
            }
            Some(_) => {
                state.system.refresh_cpu_usage();
                let usage = state.system.global_cpu_usage();
                state.last = Some(usage);
            }
            None => state.system.refresh_cpu_usage(),
        }
        state.refreshed_at = Some(now);
        state.last
    }
}

/// Applies [`ThrottleConfig`] to envelopes on their way into a queue.
pub struct Admission {
    config: ThrottleConfig,
    probe: Arc<dyn LoadProbe>,
}

impl Admission {
    /// Creates an admission gate over `probe`.
    pub fn new(config: ThrottleConfig, probe: Arc<dyn LoadProbe>) -> Self {
        Self { config, probe }
    }

    /// Active thresholds.
    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Samples load; CPU is only read when a CPU threshold is set.
    pub fn sample(&self, in_flight: usize) -> LoadSample {
        LoadSample {
            cpu_percent: if self.config.watches_cpu() {
                self.probe.cpu_percent()
            } else {
                None
            },
            in_flight,
        }
    }

    /// Returns the envelope, deferred if it is throttleable and load is high.
    ///
    /// The boolean is `true` when the envelope was deferred.
    pub fn admit(
        &self,
        task: ScheduledTask,
        in_flight: usize,
        now: Instant,
    ) -> (ScheduledTask, bool) {
        if !task.priority().is_throttleable() {
            return (task, false);
        }
        let sample = self.sample(in_flight);
        if !self.config.is_overloaded(&sample) {
            return (task, false);
        }
        tracing::debug!(
            task_id = %task.task_id(),
            priority = task.priority().as_label(),
            cpu = ?sample.cpu_percent,
            in_flight = sample.in_flight,
            defer_ms = self.config.defer.as_millis() as u64,
            "admission deferred task"
        );
        (task.defer_until(now + self.config.defer), true)
    }
}
