//! # Orchestrator configuration.
//!
//! [`OrchestratorConfig`] centralizes pool layout, retry defaults, event bus
//! sizing, shutdown and retention windows, and admission thresholds.
//! It deserializes from any `serde` format; every field has a default, and
//! durations are given in (fractional) seconds.
//!
//! ## Sentinel values
//! - `retention = 0s` → terminal records are kept forever
//! - `grace = 0s`     → `stop(true)` does not wait at all
//! - `jitter_fraction <= 0` → no jitter
//!
//! ## Pool routing
//! Every [`TaskCategory`] is served by exactly one pool:
//! 1. the first pool (by name) listing it in `pool_categories`;
//! 2. otherwise a pool named after the category (`"llm"`, `"tool"`, `"background"`)
//!    that has no explicit `pool_categories` entry;
//! 3. otherwise the `"background"` pool, or the first pool by name.
//!
//! ```rust
//! use taskhive::OrchestratorConfig;
//!
//! let cfg: OrchestratorConfig = serde_json::from_str(r#"{
//!     "pool_sizes": { "llm": 2, "workers": 8 },
//!     "pool_categories": { "workers": ["tool", "background"] },
//!     "default_max_retries": 2,
//!     "grace": 5.0
//! }"#).unwrap();
//!
//! let pools = cfg.pool_specs();
//! assert_eq!(pools[0].name, "llm");
//! assert_eq!(pools[1].categories.len(), 2);
//! ```

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
use crate::queue::ThrottleConfig;
use crate::tasks::TaskCategory;

/// Global configuration for the orchestrator.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Pool name → number of execution slots.
    pub pool_sizes: HashMap<String, usize>,

    /// Pool name → categories it serves (see module docs for the fallback rules).
    pub pool_categories: HashMap<String, Vec<TaskCategory>>,

    /// Retry budget when neither the submission nor the registration sets one.
    pub default_max_retries: u32,

    /// Exponential backoff base (seconds).
    pub default_backoff_base: f64,

    /// Backoff cap (seconds).
    pub default_backoff_cap: f64,

    /// Floor applied to every retry delay.
    #[serde(deserialize_with = "duration_secs")]
    pub min_retry_delay: Duration,

    /// Symmetric jitter as a fraction of the delay (`0.1` = ±10%).
    pub jitter_fraction: f64,

    /// Capacity of the event bus ring buffer (min 1).
    pub bus_capacity: usize,

    /// External broker address (`None` = in-process only).
    pub broadcast_transport: Option<String>,

    /// Subject prefix for the external mirror; events go to `{subject}.{event_type}`.
    pub broadcast_subject: String,

    /// Bound for draining in `stop(true)` and for joining slots on stop.
    #[serde(deserialize_with = "duration_secs")]
    pub grace: Duration,

    /// How long terminal records stay queryable.
    #[serde(deserialize_with = "duration_secs")]
    pub retention: Duration,

    /// Admission throttling thresholds.
    pub throttle: ThrottleConfig,
}

impl Default for OrchestratorConfig {
    /// Default configuration:
    ///
    /// - pools `llm = 2`, `tool = 4`, `background = 2`, routed by name
    /// - `default_max_retries = 3`, `base = 2.0`, `cap = 30s`, `min = 50ms`, `jitter = ±10%`
    /// - `bus_capacity = 1024`, in-process only, subject `"taskhive.events"`
    /// - `grace = 30s`, `retention = 1h`
    /// - [`ThrottleConfig::default`]
    fn default() -> Self {
        let pool_sizes = [("llm", 2), ("tool", 4), ("background", 2)]
            .into_iter()
            .map(|(name, size)| (name.to_string(), size))
            .collect();
        Self {
            pool_sizes,
            pool_categories: HashMap::new(),
            default_max_retries: 3,
            default_backoff_base: 2.0,
            default_backoff_cap: 30.0,
            min_retry_delay: Duration::from_millis(50),
            jitter_fraction: 0.1,
            bus_capacity: 1024,
            broadcast_transport: None,
            broadcast_subject: "taskhive.events".to_string(),
            grace: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            throttle: ThrottleConfig::default(),
        }
    }
}

/// Resolved layout of one pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSpec {
    /// Pool name.
    pub name: String,
    /// Initial number of slots.
    pub size: usize,
    /// Categories routed to this pool.
    pub categories: Vec<TaskCategory>,
}

impl OrchestratorConfig {
    /// Backoff policy built from the `default_backoff_*`, `min_retry_delay`
    /// and `jitter_fraction` fields.
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::from_secs(
            self.default_backoff_base,
            self.default_backoff_cap,
            self.min_retry_delay,
            JitterPolicy::proportional(self.jitter_fraction),
        )
    }

    /// Retry policy with `max_retries` or the configured default.
    pub fn retry_policy(&self, max_retries: Option<u32>) -> RetryPolicy {
        RetryPolicy::new(
            max_retries.unwrap_or(self.default_max_retries),
            self.backoff(),
        )
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Retention window as an `Option` (`None` = keep forever).
    #[inline]
    pub fn retention_window(&self) -> Option<Duration> {
        if self.retention == Duration::ZERO {
            None
        } else {
            Some(self.retention)
        }
    }

    /// Resolves pools and category routing; sorted by pool name.
    ///
    /// An empty `pool_sizes` yields one `"default"` pool of size 1.
    pub fn pool_specs(&self) -> Vec<PoolSpec> {
        let mut specs: Vec<PoolSpec> = self
            .pool_sizes
            .iter()
            .map(|(name, &size)| PoolSpec {
                name: name.clone(),
                size,
                categories: Vec::new(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        if specs.is_empty() {
            specs.push(PoolSpec {
                name: "default".to_string(),
                size: 1,
                categories: Vec::new(),
            });
        }

        for cat in TaskCategory::ALL {
            let explicit = specs.iter().position(|s| {
                self.pool_categories
                    .get(&s.name)
                    .is_some_and(|cats| cats.contains(&cat))
            });
            let by_name = specs.iter().position(|s| {
                !self.pool_categories.contains_key(&s.name) && s.name == cat.as_str()
            });
            let fallback = specs
                .iter()
                .position(|s| s.name == TaskCategory::Background.as_str())
                .unwrap_or(0);
            let idx = explicit.or(by_name).unwrap_or(fallback);
            specs[idx].categories.push(cat);
        }
        specs
    }
}

/// Deserializes a non-negative number of seconds into a [`Duration`].
pub(crate) fn duration_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(specs: &[PoolSpec], name: &str) -> Vec<TaskCategory> {
        specs
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.categories.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_default_routes_by_name() {
        let specs = OrchestratorConfig::default().pool_specs();
        let names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["background", "llm", "tool"]);
        assert_eq!(cats(&specs, "llm"), vec![TaskCategory::Llm]);
        assert_eq!(cats(&specs, "tool"), vec![TaskCategory::Tool]);
        assert_eq!(cats(&specs, "background"), vec![TaskCategory::Background]);
    }

    #[test]
    fn test_explicit_and_fallback_routing() {
        let cfg = OrchestratorConfig {
            pool_sizes: [("gpu".to_string(), 1), ("misc".to_string(), 3)].into(),
            pool_categories: [("gpu".to_string(), vec![TaskCategory::Llm])].into(),
            ..OrchestratorConfig::default()
        };
        let specs = cfg.pool_specs();
        assert_eq!(cats(&specs, "gpu"), vec![TaskCategory::Llm]);
        // no "background" pool → first pool by name takes the rest
        assert_eq!(
            cats(&specs, "gpu").len() + cats(&specs, "misc").len(),
            TaskCategory::ALL.len()
        );
        assert!(cats(&specs, "gpu").contains(&TaskCategory::Tool));
    }

    #[test]
    fn test_empty_pools_get_default() {
        let cfg = OrchestratorConfig {
            pool_sizes: HashMap::new(),
            ..OrchestratorConfig::default()
        };
        let specs = cfg.pool_specs();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "default");
        assert_eq!(specs[0].categories, TaskCategory::ALL.to_vec());
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: OrchestratorConfig = serde_json::from_str(
            r#"{
                "default_max_retries": 2,
                "default_backoff_base": 2.0,
                "default_backoff_cap": 10,
                "retention": 0,
                "grace": 1.5,
                "broadcast_transport": "nats://127.0.0.1:4222",
                "throttle": { "max_in_flight": 16 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.default_max_retries, 2);
        assert_eq!(cfg.backoff().cap, Duration::from_secs(10));
        assert_eq!(cfg.retention_window(), None);
        assert_eq!(cfg.grace, Duration::from_millis(1500));
        assert_eq!(cfg.throttle.max_in_flight, 16);
        assert_eq!(cfg.throttle.cpu_threshold, 90.0);
        assert_eq!(cfg.pool_sizes.len(), 3);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let err = serde_json::from_str::<OrchestratorConfig>(r#"{ "grace": -1 }"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_retry_policy_defaults() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.retry_policy(None).max_retries, 3);
        assert_eq!(cfg.retry_policy(Some(0)).max_retries, 0);
        assert_eq!(
            cfg.backoff().jitter,
            JitterPolicy::Proportional { fraction: 0.1 }
        );
    }
}
