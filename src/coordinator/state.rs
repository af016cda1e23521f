//! Per-feature task bookkeeping.
//!
//! Every transition happens here, under the coordinator's lock. Methods
//! return the [`Effect`]s (publishes) to perform once the lock is released.

use super::graph::TaskGraph;
use crate::config::CoordinatorConfig;
use crate::error::{FailureKind, FlowError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::prp::{ExecutionResult, TaskError};
use crate::task::{TaskSpecification, TaskState};
use crate::transport::{AgentMessage, Backoff, MessageKind, TaskAssignment, topics};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Running => "running",
            FeatureStatus::Completed => "completed",
            FeatureStatus::Failed => "failed",
            FeatureStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal summary of a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureOutcome {
    pub feature_id: String,
    pub title: String,
    pub status: FeatureStatus,
    pub success: bool,
    #[serde(default)]
    pub failed_tasks: Vec<String>,
    #[serde(default)]
    pub cancelled_tasks: Vec<String>,
    /// Last execution result per task, where one exists.
    #[serde(default)]
    pub results: BTreeMap<String, ExecutionResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub title: String,
    pub capability: String,
    pub state: TaskState,
    pub attempts: u32,
    #[serde(default)]
    pub claimant: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub last_error: Option<TaskError>,
    pub updated_at: DateTime<Utc>,
}

/// Point-in-time view of a feature, as written to `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub feature_id: String,
    pub title: String,
    pub status: FeatureStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskSnapshot>,
    #[serde(default)]
    pub outcome: Option<FeatureOutcome>,
}

/// Work the caller performs after releasing the lock.
#[derive(Debug)]
pub(crate) enum Effect {
    Publish {
        feature_id: String,
        task_id: String,
        topic: String,
        message: AgentMessage,
    },
    Outcome(FeatureOutcome),
}

/// Borrowed coordinator services a transition needs.
pub(crate) struct Env<'a> {
    pub config: &'a CoordinatorConfig,
    pub backoff: &'a Backoff,
    pub events: &'a EventLog,
    pub sender: &'a str,
}

pub(crate) struct TaskRecord {
    spec: TaskSpecification,
    capability: String,
    state: TaskState,
    attempts: u32,
    claimant: Option<String>,
    correlation_id: Option<String>,
    redeliveries: u32,
    last_error: Option<TaskError>,
    result: Option<ExecutionResult>,
    updated_at: DateTime<Utc>,
    state_since: Instant,
    retry_at: Option<Instant>,
    assignment: Option<AgentMessage>,
    cancel: Option<CancellationToken>,
}

impl TaskRecord {
    fn new(spec: TaskSpecification, capability: String) -> Self {
        Self {
            spec,
            capability,
            state: TaskState::Pending,
            attempts: 0,
            claimant: None,
            correlation_id: None,
            redeliveries: 0,
            last_error: None,
            result: None,
            updated_at: Utc::now(),
            state_since: Instant::now(),
            retry_at: None,
            assignment: None,
            cancel: None,
        }
    }

    fn enter(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
        self.state_since = Instant::now();
    }

    fn release_claim(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            id: self.spec.id.clone(),
            title: self.spec.title.clone(),
            capability: self.capability.clone(),
            state: self.state,
            attempts: self.attempts,
            claimant: self.claimant.clone(),
            dependencies: self.spec.dependencies.clone(),
            last_error: self.last_error.clone(),
            updated_at: self.updated_at,
        }
    }
}

enum Overdue {
    Redeliver,
    Undelivered { topic: String, attempts: u32 },
    TimedOut,
}

pub(crate) struct FeatureRecord {
    id: String,
    title: String,
    status: FeatureStatus,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    graph: TaskGraph,
    tasks: HashMap<String, TaskRecord>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<FeatureOutcome>>,
}

impl FeatureRecord {
    pub(crate) fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        tasks: Vec<TaskSpecification>,
        graph: TaskGraph,
        default_capability: &str,
    ) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|mut spec| {
                let capability = spec.capability_or(default_capability).to_string();
                spec.assigned_agent = Some(capability.clone());
                (spec.id.clone(), TaskRecord::new(spec, capability))
            })
            .collect();
        let (outcome, _) = watch::channel(None);

        Self {
            id: id.into(),
            title: title.into(),
            status: FeatureStatus::Running,
            created_at: Utc::now(),
            finished_at: None,
            graph,
            tasks,
            cancel: CancellationToken::new(),
            outcome,
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn status(&self) -> FeatureStatus {
        self.status
    }

    pub(crate) fn subscribe_outcome(&self) -> watch::Receiver<Option<FeatureOutcome>> {
        self.outcome.subscribe()
    }

    fn event(&self, action: EventAction, task_id: &str) -> Event {
        Event::new(action).with_feature(&self.id).with_task(task_id)
    }

    fn dependencies_completed(&self, task: &TaskRecord) -> bool {
        task.spec.dependencies.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.state == TaskState::Completed)
        })
    }

    // =====================================================================
    // Queueing
    // =====================================================================

    /// Publish every pending task whose dependencies are complete and whose
    /// retry delay (if any) has elapsed. Highest priority first, then id.
    pub(crate) fn queue_ready(&mut self, env: &Env<'_>) -> Vec<Effect> {
        if self.status != FeatureStatus::Running {
            return Vec::new();
        }
        let now = Instant::now();
        let mut ready: Vec<(Reverse<_>, String)> = self
            .tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .filter(|t| t.retry_at.is_none_or(|at| at <= now))
            .filter(|t| self.dependencies_completed(t))
            .map(|t| (Reverse(t.spec.priority), t.spec.id.clone()))
            .collect();
        ready.sort();

        let mut effects = Vec::new();
        for (_, task_id) in ready {
            effects.extend(self.queue(&task_id, env));
        }
        effects
    }

    fn queue(&mut self, task_id: &str, env: &Env<'_>) -> Vec<Effect> {
        let feature_id = self.id.clone();
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };

        task.attempts += 1;
        let assignment = TaskAssignment {
            feature_id: feature_id.clone(),
            task: task.spec.clone(),
            attempt: task.attempts,
            completed_dependencies: task.spec.dependencies.clone(),
        };
        let payload = match AgentMessage::encode(&assignment) {
            Ok(payload) => payload,
            Err(e) => {
                let error = TaskError {
                    kind: FailureKind::Malformed,
                    message: e.to_string(),
                };
                return self.fail_task(task_id, error, None, env);
            }
        };

        let correlation_id = Uuid::new_v4().to_string();
        let topic = topics::assignments(&task.capability);
        let message = AgentMessage::correlated(
            MessageKind::TaskAssignment,
            env.sender,
            &topic,
            payload,
            &correlation_id,
        );

        task.enter(TaskState::Queued);
        task.correlation_id = Some(correlation_id.clone());
        task.claimant = None;
        task.redeliveries = 0;
        task.retry_at = None;
        task.assignment = Some(message.clone());

        info!(feature = %feature_id, task = %task_id, attempt = task.attempts, topic = %topic, "task queued");
        let details = json!({
            "attempt": task.attempts,
            "capability": task.capability,
            "correlation_id": correlation_id,
        });
        env.events
            .record(self.event(EventAction::TaskQueue, task_id).with_details(details));

        vec![Effect::Publish {
            feature_id,
            task_id: task_id.to_string(),
            topic,
            message,
        }]
    }

    // =====================================================================
    // Claims and progress
    // =====================================================================

    /// Compare-and-swap `queued -> claimed` for the attempt `correlation_id`.
    pub(crate) fn claim(
        &mut self,
        task_id: &str,
        correlation_id: &str,
        agent_id: &str,
        env: &Env<'_>,
    ) -> Result<CancellationToken> {
        if self.status != FeatureStatus::Running {
            return Err(FlowError::Cancelled(format!(
                "feature '{}' is {}",
                self.id, self.status
            )));
        }
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| FlowError::NotFound(format!("task '{}' in feature '{}'", task_id, self.id)))?;

        match task.state {
            TaskState::Claimed | TaskState::InProgress => {
                return Err(FlowError::AlreadyClaimed {
                    task_id: task_id.to_string(),
                    holder: task.claimant.clone(),
                });
            }
            TaskState::Queued if task.correlation_id.as_deref() == Some(correlation_id) => {}
            state => {
                return Err(FlowError::Validation(format!(
                    "assignment for task '{}' is stale (state: {}, attempt {})",
                    task_id, state, task.attempts
                )));
            }
        }
        if !self.dependencies_completed(task) {
            return Err(FlowError::Validation(format!(
                "task '{}' has incomplete dependencies",
                task_id
            )));
        }

        let token = self.cancel.child_token();
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Err(FlowError::NotFound(format!("task '{}'", task_id)));
        };
        task.enter(TaskState::Claimed);
        task.claimant = Some(agent_id.to_string());
        task.cancel = Some(token.clone());
        let attempt = task.attempts;

        info!(feature = %self.id, task = %task_id, agent = %agent_id, attempt, "task claimed");
        env.events.record(
            self.event(EventAction::TaskClaim, task_id)
                .with_details(json!({ "agent": agent_id, "attempt": attempt })),
        );
        Ok(token)
    }

    /// `claimed -> in_progress` on the claimant's first heartbeat.
    pub(crate) fn mark_started(&mut self, task_id: &str, correlation_id: &str, env: &Env<'_>) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.state != TaskState::Claimed || task.correlation_id.as_deref() != Some(correlation_id) {
            return false;
        }
        // keep state_since: the task timeout runs from the claim
        let since = task.state_since;
        task.enter(TaskState::InProgress);
        task.state_since = since;
        let agent = task.claimant.clone();
        env.events.record(
            self.event(EventAction::TaskStart, task_id)
                .with_details(json!({ "agent": agent })),
        );
        true
    }

    // =====================================================================
    // Results
    // =====================================================================

    /// Apply an execution report for attempt `correlation_id`. Reports for
    /// superseded attempts or finished tasks are ignored.
    pub(crate) fn record_result(
        &mut self,
        task_id: &str,
        correlation_id: &str,
        result: ExecutionResult,
        env: &Env<'_>,
    ) -> Vec<Effect> {
        if self.status != FeatureStatus::Running {
            return Vec::new();
        }
        let Some(task) = self.tasks.get(task_id) else {
            warn!(feature = %self.id, task = %task_id, "result for unknown task");
            return Vec::new();
        };
        let current = task.correlation_id.as_deref() == Some(correlation_id);
        if !current || !matches!(task.state, TaskState::Claimed | TaskState::InProgress) {
            debug!(feature = %self.id, task = %task_id, state = %task.state, "ignoring stale result");
            return Vec::new();
        }

        if result.success {
            return self.complete_task(task_id, result, env);
        }
        let error = result.error.clone().unwrap_or_else(|| {
            TaskError::from(&FlowError::ExecutionFailure(
                "agent reported failure without detail".to_string(),
            ))
        });
        self.fail_task(task_id, error, Some(result), env)
    }

    fn complete_task(&mut self, task_id: &str, result: ExecutionResult, env: &Env<'_>) -> Vec<Effect> {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };
        task.enter(TaskState::Completed);
        task.cancel = None;
        task.assignment = None;
        let details = json!({
            "agent": result.agent_id,
            "attempt": task.attempts,
            "duration_ms": result.duration_ms,
        });
        task.result = Some(result);

        info!(feature = %self.id, task = %task_id, "task completed");
        env.events
            .record(self.event(EventAction::TaskComplete, task_id).with_details(details));

        let mut effects = self.queue_ready(env);
        effects.extend(self.finish_if_done(env));
        effects
    }

    /// Retry `task_id` if the failure class and attempt budget allow it;
    /// otherwise fail it for good and cancel everything downstream.
    pub(crate) fn fail_task(
        &mut self,
        task_id: &str,
        error: TaskError,
        result: Option<ExecutionResult>,
        env: &Env<'_>,
    ) -> Vec<Effect> {
        let max_attempts = env.config.max_attempts;
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };
        task.release_claim();
        task.assignment = None;
        if result.is_some() {
            task.result = result;
        }
        task.last_error = Some(error.clone());

        if error.kind.is_retryable() && task.attempts < max_attempts {
            let delay = env.backoff.delay(task.attempts.saturating_sub(1));
            task.enter(TaskState::Pending);
            task.correlation_id = None;
            task.claimant = None;
            task.retry_at = Some(Instant::now() + delay);
            let attempt = task.attempts;

            warn!(
                feature = %self.id,
                task = %task_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "task failed, retrying"
            );
            env.events.record(self.event(EventAction::TaskRetry, task_id).with_details(json!({
                "attempt": attempt,
                "next_attempt": attempt + 1,
                "delay_ms": delay.as_millis() as u64,
                "error": error,
            })));
            return if delay.is_zero() {
                self.queue_ready(env)
            } else {
                Vec::new()
            };
        }

        task.enter(TaskState::Failed);
        let attempt = task.attempts;
        warn!(feature = %self.id, task = %task_id, attempt, error = %error, "task failed");
        env.events.record(
            self.event(EventAction::TaskFail, task_id)
                .with_details(json!({ "attempt": attempt, "error": error })),
        );

        let reason = TaskError {
            kind: FailureKind::Cancelled,
            message: format!("upstream task '{}' failed", task_id),
        };
        for downstream in self.graph.transitive_dependents(task_id) {
            self.cancel_task(&downstream, reason.clone(), env);
        }

        self.finish_if_done(env)
    }

    /// The publish of the current attempt reached no subscriber.
    pub(crate) fn delivery_exhausted(
        &mut self,
        task_id: &str,
        correlation_id: &str,
        topic: &str,
        attempts: u32,
        env: &Env<'_>,
    ) -> Vec<Effect> {
        let current = self.tasks.get(task_id).is_some_and(|t| {
            t.state == TaskState::Queued && t.correlation_id.as_deref() == Some(correlation_id)
        });
        if !current || self.status != FeatureStatus::Running {
            return Vec::new();
        }
        let err = FlowError::DeliveryExhausted {
            topic: topic.to_string(),
            attempts,
        };
        self.fail_task(task_id, TaskError::from(&err), None, env)
    }

    fn cancel_task(&mut self, task_id: &str, reason: TaskError, env: &Env<'_>) {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return;
        };
        if task.state.is_terminal() {
            return;
        }
        task.release_claim();
        task.assignment = None;
        task.enter(TaskState::Cancelled);
        task.last_error = Some(reason.clone());
        env.events.record(
            self.event(EventAction::TaskCancel, task_id)
                .with_details(json!({ "reason": reason.message })),
        );
    }

    // =====================================================================
    // Cancellation, sweeping, completion
    // =====================================================================

    /// Cancel the feature: in-flight work is signalled and every task that
    /// has not finished becomes cancelled.
    pub(crate) fn cancel(&mut self, reason: &str, env: &Env<'_>) -> Vec<Effect> {
        if self.status != FeatureStatus::Running {
            return Vec::new();
        }
        self.cancel.cancel();
        let error = TaskError {
            kind: FailureKind::Cancelled,
            message: reason.to_string(),
        };
        for task_id in self.graph.order().to_vec() {
            self.cancel_task(&task_id, error.clone(), env);
        }

        self.status = FeatureStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        let outcome = self.build_outcome();
        self.outcome.send_replace(Some(outcome.clone()));

        info!(feature = %self.id, reason = %reason, "feature cancelled");
        env.events.record(
            Event::new(EventAction::FeatureCancel)
                .with_feature(&self.id)
                .with_details(json!({ "reason": reason, "cancelled_tasks": outcome.cancelled_tasks })),
        );
        vec![Effect::Outcome(outcome)]
    }

    /// Redeliver stale assignments, fail overdue claims and queue tasks
    /// whose retry delay has elapsed.
    pub(crate) fn sweep(&mut self, env: &Env<'_>) -> Vec<Effect> {
        if self.status != FeatureStatus::Running {
            return Vec::new();
        }
        let now = Instant::now();
        let assignment_timeout = Duration::from_secs(env.config.assignment_timeout_secs);
        let task_timeout = Duration::from_secs(env.config.task_timeout_secs);

        let mut effects = Vec::new();
        for task_id in self.graph.order().to_vec() {
            let Some(task) = self.tasks.get(&task_id) else {
                continue;
            };
            let age = now.saturating_duration_since(task.state_since);
            let overdue = match task.state {
                TaskState::Queued if age >= assignment_timeout => {
                    if task.redeliveries < env.config.max_redeliveries {
                        Overdue::Redeliver
                    } else {
                        Overdue::Undelivered {
                            topic: topics::assignments(&task.capability),
                            attempts: task.redeliveries + 1,
                        }
                    }
                }
                TaskState::Claimed | TaskState::InProgress if age >= task_timeout => Overdue::TimedOut,
                _ => continue,
            };

            match overdue {
                Overdue::Redeliver => effects.extend(self.redeliver(&task_id)),
                Overdue::Undelivered { topic, attempts } => {
                    let err = FlowError::DeliveryExhausted { topic, attempts };
                    effects.extend(self.fail_task(&task_id, TaskError::from(&err), None, env));
                }
                Overdue::TimedOut => {
                    let err = FlowError::ExecutionFailure(format!(
                        "task '{}' produced no result within {}s",
                        task_id,
                        task_timeout.as_secs()
                    ));
                    effects.extend(self.fail_task(&task_id, TaskError::from(&err), None, env));
                }
            }
        }

        effects.extend(self.queue_ready(env));
        effects
    }

    fn redeliver(&mut self, task_id: &str) -> Vec<Effect> {
        let feature_id = self.id.clone();
        let Some(task) = self.tasks.get_mut(task_id) else {
            return Vec::new();
        };
        let Some(message) = task.assignment.clone() else {
            return Vec::new();
        };
        task.redeliveries += 1;
        task.state_since = Instant::now();
        warn!(
            feature = %feature_id,
            task = %task_id,
            redelivery = task.redeliveries,
            "assignment unclaimed, redelivering"
        );
        vec![Effect::Publish {
            feature_id,
            task_id: task_id.to_string(),
            topic: message.recipient_id.clone(),
            message,
        }]
    }

    fn finish_if_done(&mut self, env: &Env<'_>) -> Vec<Effect> {
        if self.status != FeatureStatus::Running || !self.tasks.values().all(|t| t.state.is_terminal()) {
            return Vec::new();
        }
        let all_completed = self.tasks.values().all(|t| t.state == TaskState::Completed);
        self.status = if all_completed {
            FeatureStatus::Completed
        } else {
            FeatureStatus::Failed
        };
        self.finished_at = Some(Utc::now());
        let outcome = self.build_outcome();
        self.outcome.send_replace(Some(outcome.clone()));

        info!(feature = %self.id, status = %self.status, "feature finished");
        env.events.record(
            Event::new(EventAction::FeatureComplete)
                .with_feature(&self.id)
                .with_details(json!({
                    "success": outcome.success,
                    "failed_tasks": outcome.failed_tasks,
                    "cancelled_tasks": outcome.cancelled_tasks,
                })),
        );
        vec![Effect::Outcome(outcome)]
    }

    fn ids_in_state(&self, state: TaskState) -> Vec<String> {
        self.graph
            .order()
            .iter()
            .filter(|id| self.tasks.get(*id).is_some_and(|t| t.state == state))
            .cloned()
            .collect()
    }

    fn build_outcome(&self) -> FeatureOutcome {
        let results = self
            .tasks
            .iter()
            .filter_map(|(id, t)| t.result.clone().map(|r| (id.clone(), r)))
            .collect();
        FeatureOutcome {
            feature_id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            success: self.status == FeatureStatus::Completed,
            failed_tasks: self.ids_in_state(TaskState::Failed),
            cancelled_tasks: self.ids_in_state(TaskState::Cancelled),
            results,
        }
    }

    pub(crate) fn snapshot(&self) -> FeatureSnapshot {
        FeatureSnapshot {
            feature_id: self.id.clone(),
            title: self.title.clone(),
            status: self.status,
            created_at: self.created_at,
            finished_at: self.finished_at,
            tasks: self
                .graph
                .order()
                .iter()
                .filter_map(|id| self.tasks.get(id))
                .map(TaskRecord::snapshot)
                .collect(),
            outcome: self.outcome.borrow().clone(),
        }
    }
}
