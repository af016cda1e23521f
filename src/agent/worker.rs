//! The loop that drives one runtime instance.

use crate::agent::{AgentRuntime, ExecutionContext};
use crate::coordinator::ClaimArbiter;
use crate::error::FlowError;
use crate::knowledge::KnowledgeStore;
use crate::prp::PrpProcessor;
use crate::task::TaskState;
use crate::transport::{
    AgentMessage, AgentStatus, Deduplicator, Heartbeat, MessageBus, MessageKind, Subscription,
    TaskAssignment, TaskReport, topics,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives assignments for one capability, claims them, runs them
/// through the PRP processor and reports the result.
///
/// Tasks are handled one at a time, so one worker never runs two PRPs
/// concurrently.
pub struct AgentWorker {
    id: String,
    runtime: Arc<dyn AgentRuntime>,
    processor: Arc<PrpProcessor>,
    bus: Arc<MessageBus>,
    claims: Arc<dyn ClaimArbiter>,
    knowledge: Arc<KnowledgeStore>,
    dedup: Deduplicator,
    heartbeat_interval: Duration,
}

impl AgentWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        runtime: Arc<dyn AgentRuntime>,
        processor: Arc<PrpProcessor>,
        bus: Arc<MessageBus>,
        claims: Arc<dyn ClaimArbiter>,
        knowledge: Arc<KnowledgeStore>,
        dedup_capacity: usize,
        heartbeat_interval: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            runtime,
            processor,
            bus,
            claims,
            knowledge,
            dedup: Deduplicator::new(dedup_capacity),
            heartbeat_interval,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn capability(&self) -> &str {
        self.runtime.capability()
    }

    /// Subscribe to this worker's assignment topic. Do this before the
    /// coordinator can publish, or early assignments are missed.
    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe(&topics::assignments(self.capability()))
    }

    /// Serve `inbox` until `shutdown` fires or the bus closes.
    pub async fn run(self, mut inbox: Subscription, shutdown: CancellationToken) {
        info!(agent = %self.id, capability = %self.capability(), "agent worker started");
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.heartbeat(AgentStatus::Idle, None, None, None).await,
                message = inbox.recv() => match message {
                    Some(message) => self.handle(message, &mut ticker).await,
                    None => break,
                },
            }
        }

        inbox.cancel();
        self.heartbeat(AgentStatus::Stopping, None, None, None).await;
        info!(agent = %self.id, "agent worker stopped");
    }

    async fn handle(&self, message: AgentMessage, ticker: &mut Interval) {
        if message.message_type != MessageKind::TaskAssignment {
            debug!(agent = %self.id, kind = %message.message_type, "ignoring non-assignment message");
            return;
        }
        if !self.dedup.first_delivery(&message) {
            debug!(agent = %self.id, message = %message.id, "dropping duplicate delivery");
            return;
        }
        let assignment: TaskAssignment = match message.payload_as() {
            Ok(assignment) => assignment,
            Err(e) => {
                warn!(agent = %self.id, error = %e, "dropping malformed assignment");
                return;
            }
        };
        let task_id = assignment.task.id.clone();

        if !self.runtime.accept(&assignment) {
            debug!(agent = %self.id, task = %task_id, "assignment not accepted");
            return;
        }

        let grant = match self.claims.claim(
            &assignment.feature_id,
            &task_id,
            message.correlation_id(),
            &self.id,
        ) {
            Ok(grant) => grant,
            Err(FlowError::AlreadyClaimed { holder, .. }) => {
                debug!(agent = %self.id, task = %task_id, holder = ?holder, "lost claim race");
                return;
            }
            Err(e) => {
                debug!(agent = %self.id, task = %task_id, error = %e, "claim refused");
                return;
            }
        };

        self.heartbeat(
            AgentStatus::Busy,
            Some(&task_id),
            Some(TaskState::InProgress),
            Some(&message),
        )
        .await;

        let ctx = ExecutionContext {
            agent_id: self.id.clone(),
            feature_id: assignment.feature_id.clone(),
            task_id: task_id.clone(),
            correlation_id: message.correlation_id().to_string(),
            attempt: assignment.attempt,
            knowledge: Arc::clone(&self.knowledge),
            cancel: grant.cancel,
        };

        ticker.reset();
        let outcome = {
            let work = self.processor.process(&assignment, self.runtime.as_ref(), &ctx);
            tokio::pin!(work);
            loop {
                tokio::select! {
                    outcome = &mut work => break outcome,
                    _ = ticker.tick() => {
                        self.heartbeat(AgentStatus::Busy, Some(&task_id), Some(TaskState::InProgress), None).await
                    }
                }
            }
        };

        info!(
            agent = %self.id,
            task = %task_id,
            attempt = assignment.attempt,
            stage = %outcome.run.stage(),
            success = outcome.result.success,
            "task attempt finished"
        );

        let report = TaskReport {
            feature_id: assignment.feature_id,
            task: assignment.task,
            attempt: assignment.attempt,
            agent_id: self.id.clone(),
            capability: self.capability().to_string(),
            result: outcome.result,
        };
        let reply = match AgentMessage::encode(&report) {
            Ok(payload) => message.reply(MessageKind::TaskResult, &self.id, payload),
            Err(e) => {
                warn!(agent = %self.id, task = %task_id, error = %e, "failed to encode report");
                return;
            }
        };
        if let Err(e) = self.bus.publish(topics::RESULTS, reply).await {
            warn!(agent = %self.id, task = %task_id, error = %e, "failed to publish report");
        }
    }

    async fn heartbeat(
        &self,
        status: AgentStatus,
        task_id: Option<&str>,
        progress: Option<TaskState>,
        cause: Option<&AgentMessage>,
    ) {
        let beat = Heartbeat {
            agent_id: self.id.clone(),
            capability: self.capability().to_string(),
            status,
            task_id: task_id.map(str::to_string),
            progress,
        };
        let payload = match AgentMessage::encode(&beat) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(agent = %self.id, error = %e, "failed to encode heartbeat");
                return;
            }
        };
        let message = match cause {
            Some(cause) => cause.reply(MessageKind::Heartbeat, &self.id, payload),
            None => AgentMessage::new(MessageKind::Heartbeat, &self.id, topics::HEARTBEAT, payload),
        };
        if let Err(e) = self.bus.publish(topics::HEARTBEAT, message).await {
            debug!(agent = %self.id, error = %e, "heartbeat not published");
        }
    }
}
