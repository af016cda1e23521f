//! The coordinator: owns every feature's task state and drives it from
//! transport traffic.

use super::claims::{ClaimArbiter, ClaimGrant};
use super::decompose::decompose;
use super::graph::TaskGraph;
use super::state::{Effect, Env, FeatureOutcome, FeatureRecord, FeatureSnapshot, FeatureStatus};
use crate::config::{CoordinatorConfig, TransportConfig};
use crate::error::{FlowError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::prp::PrpProcessor;
use crate::task::{FeatureRequest, TaskSpecification, TaskState};
use crate::transport::{
    AgentMessage, Backoff, DeadLetter, Deduplicator, Heartbeat, MessageBus, MessageKind,
    TaskAssignment, TaskReport, topics,
};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COORDINATOR_ID: &str = "coordinator";

/// A validated decomposition, ready to run.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tasks: Vec<TaskSpecification>,
    pub graph: TaskGraph,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    delivery_attempts: u32,
    bus: Arc<MessageBus>,
    processor: Arc<PrpProcessor>,
    events: Arc<EventLog>,
    backoff: Backoff,
    dedup: Deduplicator,
    features: Mutex<HashMap<String, FeatureRecord>>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        transport: &TransportConfig,
        bus: Arc<MessageBus>,
        processor: Arc<PrpProcessor>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            backoff: config.retry_backoff(),
            config,
            delivery_attempts: transport.max_delivery_attempts,
            bus,
            processor,
            events,
            dedup: Deduplicator::new(transport.dedup_capacity),
            features: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        COORDINATOR_ID
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FeatureRecord>> {
        self.features.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn env(&self) -> Env<'_> {
        Env {
            config: &self.config,
            backoff: &self.backoff,
            events: &self.events,
            sender: COORDINATOR_ID,
        }
    }

    fn with_feature<F>(&self, feature_id: &str, f: F) -> Vec<Effect>
    where
        F: FnOnce(&mut FeatureRecord, &Env<'_>) -> Vec<Effect>,
    {
        let env = self.env();
        let mut features = self.lock();
        match features.get_mut(feature_id) {
            Some(feature) => f(feature, &env),
            None => {
                debug!(feature = %feature_id, "message for unknown feature");
                Vec::new()
            }
        }
    }

    // =====================================================================
    // Submission
    // =====================================================================

    /// Decompose and check `request` without running anything.
    ///
    /// Every task must validate against the set of ids in the same feature,
    /// ids must be unique and the dependency graph acyclic.
    pub fn plan(&self, request: &FeatureRequest) -> Result<Plan> {
        if request.title.trim().is_empty() {
            return Err(FlowError::Validation(
                "feature request has an empty title".to_string(),
            ));
        }
        let tasks = decompose(request, &self.config)?;
        if tasks.is_empty() {
            return Err(FlowError::Validation(format!(
                "feature '{}' decomposed into no tasks",
                request.title
            )));
        }

        let mut known = HashSet::new();
        for task in &tasks {
            if !known.insert(task.id.clone()) {
                return Err(FlowError::MalformedTask {
                    task_id: task.id.clone(),
                    errors: vec!["task id is used more than once in the feature".to_string()],
                });
            }
        }
        for task in &tasks {
            self.processor.validate(task, &known).into_result()?;
        }

        let graph = TaskGraph::build(&tasks)?;
        Ok(Plan { tasks, graph })
    }

    /// Accept a feature and publish its first wave of assignments.
    ///
    /// Validation and cycle detection happen before anything is published:
    /// a rejected feature leaves no trace on the bus.
    pub async fn submit(&self, request: FeatureRequest) -> Result<String> {
        let plan = match self.plan(&request) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(title = %request.title, error = %e, "feature rejected");
                self.events.record(
                    Event::new(EventAction::FeatureReject)
                        .with_details(json!({ "title": request.title, "error": e.to_string() })),
                );
                return Err(e);
            }
        };

        let simple = Uuid::new_v4().simple().to_string();
        let feature_id = format!("feat-{}", &simple[..12]);
        let task_ids = plan.graph.order().to_vec();
        let record = FeatureRecord::new(
            &feature_id,
            &request.title,
            plan.tasks,
            plan.graph,
            &self.config.default_capability,
        );

        info!(feature = %feature_id, title = %request.title, tasks = task_ids.len(), "feature submitted");
        self.events.record(
            Event::new(EventAction::FeatureSubmit)
                .with_feature(&feature_id)
                .with_details(json!({ "title": request.title, "tasks": task_ids })),
        );

        let effects = {
            let env = self.env();
            let mut features = self.lock();
            let record = features.entry(feature_id.clone()).or_insert(record);
            record.queue_ready(&env)
        };
        self.apply(effects).await;

        Ok(feature_id)
    }

    // =====================================================================
    // Queries and control
    // =====================================================================

    pub fn status(&self, feature_id: &str) -> Result<FeatureSnapshot> {
        self.lock()
            .get(feature_id)
            .map(FeatureRecord::snapshot)
            .ok_or_else(|| FlowError::NotFound(format!("feature '{}'", feature_id)))
    }

    /// Snapshots of every tracked feature, oldest first.
    pub fn snapshots(&self) -> Vec<FeatureSnapshot> {
        let mut all: Vec<_> = self.lock().values().map(FeatureRecord::snapshot).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    /// Wait for the feature to reach a terminal outcome.
    pub async fn wait(&self, feature_id: &str) -> Result<FeatureOutcome> {
        let mut rx = self
            .lock()
            .get(feature_id)
            .map(FeatureRecord::subscribe_outcome)
            .ok_or_else(|| FlowError::NotFound(format!("feature '{}'", feature_id)))?;

        let outcome = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlowError::Transport("coordinator dropped the feature".to_string()))?;
        outcome
            .clone()
            .ok_or_else(|| FlowError::Transport("feature outcome missing".to_string()))
    }

    /// Cancel a running feature. Idempotent for finished features.
    pub async fn cancel(&self, feature_id: &str) -> Result<()> {
        let effects = {
            let env = self.env();
            let mut features = self.lock();
            let feature = features
                .get_mut(feature_id)
                .ok_or_else(|| FlowError::NotFound(format!("feature '{}'", feature_id)))?;
            feature.cancel("feature cancelled", &env)
        };
        self.apply(effects).await;
        Ok(())
    }

    /// Cancel every running feature.
    pub async fn cancel_all(&self, reason: &str) {
        let effects: Vec<Effect> = {
            let env = self.env();
            let mut features = self.lock();
            features
                .values_mut()
                .filter(|f| f.status() == FeatureStatus::Running)
                .flat_map(|f| f.cancel(reason, &env))
                .collect()
        };
        self.apply(effects).await;
    }

    /// Redeliver, time out and retry across every running feature.
    pub async fn sweep(&self) {
        let effects: Vec<Effect> = {
            let env = self.env();
            let mut features = self.lock();
            features.values_mut().flat_map(|f| f.sweep(&env)).collect()
        };
        self.apply(effects).await;
    }

    // =====================================================================
    // Event loop
    // =====================================================================

    /// Subscribe to results, heartbeats and dead letters, then serve them
    /// until `shutdown` fires.
    ///
    /// Subscriptions are taken before this returns, so reports published
    /// afterwards are never missed.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mut results = self.bus.subscribe(topics::RESULTS);
        let mut heartbeats = self.bus.subscribe(topics::HEARTBEAT);
        let mut dead_letters = self.bus.subscribe(topics::DEAD_LETTER);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let period = Duration::from_millis(this.config.sweep_interval_ms.max(1));
            let mut sweep = tokio::time::interval(period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("coordinator started");

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    Some(message) = results.recv() => this.on_result(message).await,
                    Some(message) = heartbeats.recv() => this.on_heartbeat(message),
                    Some(message) = dead_letters.recv() => this.on_dead_letter(message).await,
                    _ = sweep.tick() => {
                        if this.bus.is_closed() {
                            break;
                        }
                        this.sweep().await;
                    }
                }
            }
            info!("coordinator stopped");
        })
    }

    async fn on_result(&self, message: AgentMessage) {
        if message.message_type != MessageKind::TaskResult {
            return;
        }
        if !self.dedup.first_delivery(&message) {
            debug!(message = %message.id, "dropping duplicate result");
            return;
        }
        let report: TaskReport = match message.payload_as() {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "dropping malformed result");
                return;
            }
        };
        let correlation_id = message.correlation_id().to_string();
        let task_id = report.task.id.clone();
        let effects = self.with_feature(&report.feature_id, |feature, env| {
            feature.record_result(&task_id, &correlation_id, report.result, env)
        });
        self.apply(effects).await;
    }

    fn on_heartbeat(&self, message: AgentMessage) {
        let Ok(beat) = message.payload_as::<Heartbeat>() else {
            return;
        };
        let (Some(task_id), Some(TaskState::InProgress)) = (beat.task_id, beat.progress) else {
            return;
        };
        let env = self.env();
        let mut features = self.lock();
        for feature in features.values_mut() {
            if feature.mark_started(&task_id, message.correlation_id(), &env) {
                debug!(feature = %feature.id(), task = %task_id, agent = %beat.agent_id, "task in progress");
                break;
            }
        }
    }

    /// A dead-lettered report is fed back through [`Self::on_result`]; the
    /// deduplicator drops it when this coordinator already received it.
    async fn on_dead_letter(&self, message: AgentMessage) {
        let dead: DeadLetter = match message.payload_as() {
            Ok(dead) => dead,
            Err(e) => {
                warn!(error = %e, "dropping malformed dead letter");
                return;
            }
        };
        warn!(
            topic = %dead.topic,
            subscriber = dead.subscriber,
            attempts = dead.attempts,
            kind = %dead.original.message_type,
            reason = %dead.reason,
            "message dead-lettered"
        );

        let mut event = Event::new(EventAction::DeadLetter).with_details(json!({
            "topic": dead.topic,
            "subscriber": dead.subscriber,
            "attempts": dead.attempts,
            "reason": dead.reason,
            "message_type": dead.original.message_type,
            "correlation_id": dead.original.correlation_id(),
        }));
        if let Ok(assignment) = dead.original.payload_as::<TaskAssignment>() {
            event = event
                .with_feature(assignment.feature_id)
                .with_task(assignment.task.id);
        }
        self.events.record(event);

        if dead.topic == topics::RESULTS {
            self.on_result(*dead.original).await;
        }
    }

    // =====================================================================
    // Effects
    // =====================================================================

    async fn apply(&self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Publish {
                    feature_id,
                    task_id,
                    topic,
                    message,
                } => {
                    let correlation_id = message.correlation_id().to_string();
                    match self.bus.publish(&topic, message).await {
                        Ok(receipt) if receipt.delivered == 0 && receipt.dead_lettered > 0 => {
                            let more = self.with_feature(&feature_id, |feature, env| {
                                feature.delivery_exhausted(
                                    &task_id,
                                    &correlation_id,
                                    &topic,
                                    self.delivery_attempts,
                                    env,
                                )
                            });
                            queue.extend(more);
                        }
                        Ok(receipt) => {
                            debug!(
                                feature = %feature_id,
                                task = %task_id,
                                topic = %topic,
                                delivered = receipt.delivered,
                                "assignment published"
                            );
                        }
                        Err(e) => warn!(feature = %feature_id, task = %task_id, error = %e, "assignment not published"),
                    }
                }
                Effect::Outcome(outcome) => {
                    let payload = match AgentMessage::encode(&outcome) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(feature = %outcome.feature_id, error = %e, "failed to encode outcome");
                            continue;
                        }
                    };
                    let message = AgentMessage::new(
                        MessageKind::TaskResult,
                        COORDINATOR_ID,
                        topics::FEATURE_OUTCOMES,
                        payload,
                    );
                    if let Err(e) = self.bus.publish(topics::FEATURE_OUTCOMES, message).await {
                        debug!(feature = %outcome.feature_id, error = %e, "outcome not published");
                    }
                }
            }
        }
    }
}

impl ClaimArbiter for Coordinator {
    fn claim(
        &self,
        feature_id: &str,
        task_id: &str,
        correlation_id: &str,
        agent_id: &str,
    ) -> Result<ClaimGrant> {
        let env = self.env();
        let mut features = self.lock();
        let feature = features
            .get_mut(feature_id)
            .ok_or_else(|| FlowError::NotFound(format!("feature '{}'", feature_id)))?;
        let cancel = feature.claim(task_id, correlation_id, agent_id, &env)?;
        Ok(ClaimGrant { cancel })
    }
}
