//! Wiring: one bus, one store, one coordinator, the workers, the learner
//! and the health monitor, started in an order that never drops a message.

use crate::agent::{AgentBinding, AgentRuntime, AgentWorker, BindingSource};
use crate::config::Config;
use crate::coordinator::{ClaimArbiter, Coordinator, FeatureOutcome, FeatureSnapshot};
use crate::error::{FlowError, Result};
use crate::events::EventLog;
use crate::health::{HealthMonitor, HealthReport};
use crate::knowledge::{Embedder, HashingEmbedder, KnowledgeStore, Retriever, StoreRetriever};
use crate::learner::{DefaultPatternExtractor, OutcomeLearner, PatternExtractor};
use crate::prp::PrpProcessor;
use crate::task::FeatureRequest;
use crate::transport::MessageBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

struct RuntimeSlot {
    name: String,
    runtime: Arc<dyn AgentRuntime>,
    instances: usize,
}

pub struct SwarmBuilder {
    config: Config,
    events: Arc<EventLog>,
    knowledge: Option<Arc<KnowledgeStore>>,
    embedder: Option<Arc<dyn Embedder>>,
    retriever: Option<Arc<dyn Retriever>>,
    extractor: Arc<dyn PatternExtractor>,
    runtimes: Vec<RuntimeSlot>,
}

impl SwarmBuilder {
    fn new(config: Config) -> Self {
        Self {
            config,
            events: Arc::new(EventLog::disabled()),
            knowledge: None,
            embedder: None,
            retriever: None,
            extractor: Arc::new(DefaultPatternExtractor),
            runtimes: Vec::new(),
        }
    }

    pub fn events(mut self, events: Arc<EventLog>) -> Self {
        self.events = events;
        self
    }

    pub fn knowledge(mut self, store: Arc<KnowledgeStore>) -> Self {
        self.knowledge = Some(store);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Replace the store-backed retriever used for enrichment.
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn PatternExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Run `instances` workers for `runtime`, named after its capability.
    pub fn runtime(mut self, runtime: Arc<dyn AgentRuntime>, instances: usize) -> Self {
        self.runtimes.push(RuntimeSlot {
            name: runtime.capability().to_string(),
            runtime,
            instances,
        });
        self
    }

    /// Run the workers of a resolved binding, named after its profile.
    pub fn binding(mut self, binding: AgentBinding) -> Self {
        let name = match binding.source {
            BindingSource::Profile => binding.profile,
            BindingSource::DryRun => format!("{}-{}", binding.profile, binding.capability),
        };
        self.runtimes.push(RuntimeSlot {
            name,
            runtime: binding.runtime,
            instances: binding.instances,
        });
        self
    }

    /// Start everything. Must be called inside a Tokio runtime.
    pub fn build(self) -> Result<Swarm> {
        let config = self.config;
        let dimension = config.knowledge.embedding_dimension;
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| Arc::new(KnowledgeStore::new(dimension)));
        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::new(knowledge.dimension())),
        };
        if embedder.dimension() != knowledge.dimension() {
            return Err(FlowError::EmbeddingMismatch {
                expected: knowledge.dimension(),
                actual: embedder.dimension(),
            });
        }
        let retriever: Arc<dyn Retriever> = match self.retriever {
            Some(retriever) => retriever,
            None => Arc::new(StoreRetriever::new(
                Arc::clone(&knowledge),
                Arc::clone(&embedder),
            )),
        };

        let bus = Arc::new(MessageBus::new(&config.transport));
        let processor = Arc::new(PrpProcessor::new(retriever, config.prp.clone()));
        let coordinator = Arc::new(Coordinator::new(
            config.coordinator.clone(),
            &config.transport,
            Arc::clone(&bus),
            Arc::clone(&processor),
            Arc::clone(&self.events),
        ));
        let health = Arc::new(HealthMonitor::new(Duration::from_secs(
            config.agents.liveness_timeout_secs,
        )));

        let shutdown = CancellationToken::new();
        let mut handles = vec![
            coordinator.start(shutdown.clone()),
            health.start(&bus, shutdown.clone()),
        ];

        if config.learner.enabled {
            let learner = OutcomeLearner::new(
                Arc::clone(&knowledge),
                Arc::clone(&embedder),
                self.extractor,
                &config.learner,
                Arc::clone(&self.events),
            );
            let inbox = learner.subscribe(&bus);
            handles.push(learner.spawn(inbox, shutdown.clone()));
        }

        let heartbeat = Duration::from_secs(config.agents.heartbeat_interval_secs);
        let mut worker_ids = Vec::new();
        for slot in self.runtimes {
            for n in 1..=slot.instances.max(1) {
                let worker = AgentWorker::new(
                    format!("{}-{}", slot.name, n),
                    Arc::clone(&slot.runtime),
                    Arc::clone(&processor),
                    Arc::clone(&bus),
                    Arc::clone(&coordinator) as Arc<dyn ClaimArbiter>,
                    Arc::clone(&knowledge),
                    config.transport.dedup_capacity,
                    heartbeat,
                );
                worker_ids.push(worker.id().to_string());
                let inbox = worker.subscribe();
                handles.push(tokio::spawn(worker.run(inbox, shutdown.clone())));
            }
        }

        info!(workers = worker_ids.len(), "swarm started");
        Ok(Swarm {
            bus,
            knowledge,
            coordinator,
            health,
            shutdown,
            handles,
            worker_ids,
        })
    }
}

/// A running system.
pub struct Swarm {
    bus: Arc<MessageBus>,
    knowledge: Arc<KnowledgeStore>,
    coordinator: Arc<Coordinator>,
    health: Arc<HealthMonitor>,
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    worker_ids: Vec<String>,
}

impl Swarm {
    pub fn builder(config: Config) -> SwarmBuilder {
        SwarmBuilder::new(config)
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeStore> {
        &self.knowledge
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn worker_ids(&self) -> &[String] {
        &self.worker_ids
    }

    pub async fn submit(&self, request: FeatureRequest) -> Result<String> {
        self.coordinator.submit(request).await
    }

    pub async fn wait(&self, feature_id: &str) -> Result<FeatureOutcome> {
        self.coordinator.wait(feature_id).await
    }

    pub async fn cancel(&self, feature_id: &str) -> Result<()> {
        self.coordinator.cancel(feature_id).await
    }

    pub fn status(&self, feature_id: &str) -> Result<FeatureSnapshot> {
        self.coordinator.status(feature_id)
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(&self.coordinator)
    }

    /// Submit, then wait; past `timeout` the feature is cancelled and its
    /// cancelled outcome returned.
    pub async fn run_feature(
        &self,
        request: FeatureRequest,
        timeout: Option<Duration>,
    ) -> Result<(String, FeatureOutcome)> {
        let feature_id = self.submit(request).await?;
        let outcome = match timeout {
            None => self.wait(&feature_id).await?,
            Some(limit) => match tokio::time::timeout(limit, self.wait(&feature_id)).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    warn!(feature = %feature_id, timeout_secs = limit.as_secs(), "feature timed out, cancelling");
                    self.cancel(&feature_id).await?;
                    self.wait(&feature_id).await?
                }
            },
        };
        Ok((feature_id, outcome))
    }

    /// Cancel running features, stop every loop and close the bus.
    pub async fn shutdown(self) {
        self.coordinator.cancel_all("swarm shutting down").await;
        self.shutdown.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "swarm task ended abnormally");
            }
        }
        self.bus.close();
        info!("swarm stopped");
    }
}
