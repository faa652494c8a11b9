use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;

use tokio::sync::broadcast::error::RecvError;

use super::config::OrchestratorConfig;
use super::orchestrator::{Orchestrator, OrchestratorParts};
use super::pool::{PoolShared, WorkerPool};
use super::store::RecordStore;
use crate::events::{Broadcaster, Bus};
use crate::queue::{Admission, LoadProbe, PriorityTaskQueue, SystemLoadProbe};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::TaskRegistry;

/// Builder for an [`Orchestrator`].
///
/// The registry is frozen once [`OrchestratorBuilder::build`] runs; so is the
/// subscriber list.
pub struct OrchestratorBuilder {
    registry: TaskRegistry,
    cfg: OrchestratorConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    broadcaster: Option<Arc<dyn Broadcaster>>,
    probe: Option<Arc<dyn LoadProbe>>,
}

impl OrchestratorBuilder {
    /// Creates a builder with [`OrchestratorConfig::default`].
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry,
            cfg: OrchestratorConfig::default(),
            subscribers: Vec::new(),
            broadcaster: None,
            probe: None,
        }
    }

    /// Replaces the configuration.
    pub fn with_config(mut self, cfg: OrchestratorConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Sets event subscribers.
    ///
    /// Each subscriber gets a dedicated worker with a bounded queue.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses `broadcaster` instead of the one selected by `broadcast_transport`.
    pub fn with_broadcaster(mut self, broadcaster: Arc<dyn Broadcaster>) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Overrides the CPU probe consulted by admission throttling.
    pub fn with_load_probe(mut self, probe: Arc<dyn LoadProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Builds the orchestrator. Pools are not started yet.
    ///
    /// Must be called inside a Tokio runtime (subscriber workers and the
    /// external broadcaster spawn tasks).
    pub fn build(self) -> Arc<Orchestrator> {
        let cfg = self.cfg;
        let bus = match self.broadcaster {
            Some(b) => b,
            None => default_broadcaster(&cfg),
        };
        if !self.subscribers.is_empty() {
            subscriber_listener(Arc::clone(&bus), SubscriberSet::new(self.subscribers));
        }

        let registry = Arc::new(self.registry);
        let store = Arc::new(RecordStore::new());
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut pools = Vec::new();
        let mut routes = HashMap::new();
        for (index, spec) in cfg.pool_specs().into_iter().enumerate() {
            for category in &spec.categories {
                routes.insert(*category, index);
            }
            let shared = PoolShared {
                name: Arc::from(spec.name.as_str()),
                queue: Arc::new(PriorityTaskQueue::new()),
                registry: Arc::clone(&registry),
                store: Arc::clone(&store),
                bus: Arc::clone(&bus),
                busy: AtomicUsize::new(0),
                in_flight: Arc::clone(&in_flight),
            };
            pools.push(WorkerPool::new(shared, spec.size, spec.categories));
        }

        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(SystemLoadProbe::new()));
        let admission = Admission::new(cfg.throttle, probe);

        Arc::new(Orchestrator::from_parts(OrchestratorParts {
            cfg,
            registry,
            store,
            bus,
            pools,
            routes,
            admission,
            in_flight,
        }))
    }
}

/// Broadcaster selected by `broadcast_transport`.
fn default_broadcaster(cfg: &OrchestratorConfig) -> Arc<dyn Broadcaster> {
    let bus = Bus::new(cfg.bus_capacity_clamped());
    match cfg.broadcast_transport.as_deref() {
        None => Arc::new(bus),
        #[cfg(feature = "nats")]
        Some(address) => Arc::new(crate::events::ExternalBroadcaster::connect(
            bus,
            address,
            cfg.broadcast_subject.clone(),
            cfg.bus_capacity_clamped(),
            cfg.backoff(),
        )),
        #[cfg(not(feature = "nats"))]
        Some(address) => {
            tracing::warn!(
                address,
                "external broadcast requested without the `nats` feature; using in-process bus"
            );
            Arc::new(bus)
        }
    }
}

/// Forwards every event to the subscriber set until the broadcaster closes.
fn subscriber_listener(bus: Arc<dyn Broadcaster>, set: SubscriberSet) {
    let mut rx = bus.subscribe();
    drop(bus);
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => set.emit(ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
        set.shutdown().await;
    });
}
