//! Validate, enrich, execute and gate one task attempt.

use super::{
    AgentPrp, ContextSnippet, Criterion, ExecutionResult, GateOutcome, PrpRun, PrpStage,
    ValidationResult,
};
use crate::agent::{AgentRuntime, ExecutionContext};
use crate::config::PrpConfig;
use crate::error::FlowError;
use crate::knowledge::{KnowledgeFilter, Retriever, ScoredEntry, SourceType};
use crate::task::TaskSpecification;
use crate::transport::TaskAssignment;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Recovery advice attached to every PRP.
pub const DEFAULT_FAILURE_RECOVERY: &[&str] = &[
    "Check logs for specific error messages",
    "Verify all dependencies are available",
    "Ensure validation criteria are achievable",
    "Break down complex steps into smaller parts",
];

/// Everything one processed attempt produced.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub run: PrpRun,
    /// `None` when the task was rejected before enrichment.
    pub prp: Option<AgentPrp>,
    pub result: ExecutionResult,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        self.run.stage() == PrpStage::Completed && self.result.success
    }
}

pub struct PrpProcessor {
    retriever: Arc<dyn Retriever>,
    config: PrpConfig,
}

impl PrpProcessor {
    pub fn new(retriever: Arc<dyn Retriever>, config: PrpConfig) -> Self {
        Self { retriever, config }
    }

    pub fn config(&self) -> &PrpConfig {
        &self.config
    }

    /// Structural checks. `known_ids` are the task ids a dependency may name.
    pub fn validate(&self, task: &TaskSpecification, known_ids: &HashSet<String>) -> ValidationResult {
        let mut errors = Vec::new();

        if task.id.trim().is_empty() {
            errors.push("id is required".to_string());
        }
        if task.title.trim().is_empty() {
            errors.push("title is required".to_string());
        }
        if task.description.trim().is_empty() {
            errors.push("description is required".to_string());
        }
        if task.acceptance_criteria.is_empty() {
            errors.push("at least one acceptance criterion is required".to_string());
        }
        for (i, criterion) in task.acceptance_criteria.iter().enumerate() {
            if criterion.trim().is_empty() {
                errors.push(format!("acceptance criterion {} is empty", i + 1));
            } else if let Err(e) = Criterion::parse(criterion) {
                errors.push(format!("acceptance criterion {}: {}", i + 1, e));
            }
        }
        for (i, requirement) in task.requirements.iter().enumerate() {
            if requirement.trim().is_empty() {
                errors.push(format!("requirement {} is empty", i + 1));
            }
        }
        if task
            .assigned_agent
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            errors.push("assigned_agent must not be blank when set".to_string());
        }

        let mut seen = HashSet::new();
        for dep in &task.dependencies {
            if dep == &task.id {
                errors.push(format!("task depends on itself ('{}')", dep));
            } else if !seen.insert(dep.as_str()) {
                errors.push(format!("dependency '{}' is listed twice", dep));
            } else if !known_ids.contains(dep) {
                errors.push(format!("dependency '{}' does not resolve to a known task", dep));
            }
        }

        ValidationResult {
            task_id: task.id.clone(),
            errors,
        }
    }

    /// Build the PRP, folding in retrieved knowledge.
    ///
    /// Retrieval is bounded by `retrieval_timeout_ms`; on timeout or error the
    /// PRP carries no retrieved context and a note explaining why.
    pub async fn enrich(&self, task: &TaskSpecification) -> AgentPrp {
        let key = if task.description.trim().is_empty() {
            task.title.as_str()
        } else {
            task.description.as_str()
        };

        let mut failure_filter = KnowledgeFilter::source(SourceType::FailurePattern);
        if let Some(capability) = task.assigned_agent.as_deref() {
            failure_filter = failure_filter.with_tag(capability);
        }

        let lookup = async {
            let general = self.retriever.retrieve(key, self.config.top_k, None).await?;
            let failures = self
                .retriever
                .retrieve(key, self.config.top_k, Some(&failure_filter))
                .await?;
            Ok::<_, FlowError>((general, failures))
        };

        let mut notes = Vec::new();
        let (general, failures) =
            match tokio::time::timeout(self.config.retrieval_timeout(), lookup).await {
                Ok(Ok(hits)) => hits,
                Ok(Err(e)) => {
                    warn!(task = %task.id, error = %e, "knowledge retrieval failed, continuing without context");
                    notes.push(format!("retrieval failed: {}", e));
                    (Vec::new(), Vec::new())
                }
                Err(_) => {
                    let err = FlowError::RetrievalTimeout {
                        timeout_ms: self.config.retrieval_timeout_ms,
                    };
                    warn!(task = %task.id, "{}, continuing without context", err);
                    notes.push(err.to_string());
                    (Vec::new(), Vec::new())
                }
            };

        debug!(
            task = %task.id,
            context = general.len(),
            failure_patterns = failures.len(),
            "enriched task"
        );

        let mut failure_recovery: Vec<String> = failures
            .iter()
            .filter(|hit| hit.score > 0.0)
            .map(|hit| format!("Avoid: {}", first_line(&hit.entry.content)))
            .collect();
        failure_recovery.extend(DEFAULT_FAILURE_RECOVERY.iter().map(|s| s.to_string()));

        let implementation_steps = if task.requirements.is_empty() {
            vec![key.to_string()]
        } else {
            task.requirements.clone()
        };

        AgentPrp {
            task_id: task.id.clone(),
            goal: task.title.clone(),
            justification: task.description.clone(),
            context: general.iter().map(snippet).collect(),
            references: Default::default(),
            implementation_steps,
            validation_criteria: task.acceptance_criteria.clone(),
            success_metrics: vec![format!(
                "all {} validation criteria pass",
                task.acceptance_criteria.len()
            )],
            failure_recovery,
            enrichment_notes: notes,
        }
    }

    pub fn run_gates(&self, prp: &AgentPrp, result: &ExecutionResult) -> GateOutcome {
        GateOutcome::evaluate(prp, result)
    }

    /// Drive one attempt through every stage.
    ///
    /// Cancellation is observed between stages and while the agent runs.
    pub async fn process(
        &self,
        assignment: &TaskAssignment,
        runtime: &dyn AgentRuntime,
        ctx: &ExecutionContext,
    ) -> ProcessOutcome {
        let task = &assignment.task;
        let mut run = PrpRun::new(&task.id, &ctx.correlation_id);

        let known: HashSet<String> = assignment.completed_dependencies.iter().cloned().collect();
        if let Err(err) = self.validate(task, &known).into_result() {
            warn!(task = %task.id, error = %err, "rejecting malformed task");
            enter(&mut run, PrpStage::Rejected);
            return ProcessOutcome {
                run,
                prp: None,
                result: ExecutionResult::failure(&task.id, &ctx.agent_id, &err),
            };
        }
        enter(&mut run, PrpStage::Validated);

        if let Some(outcome) = cancelled(&mut run, None, ctx) {
            return outcome;
        }
        let prp = self.enrich(task).await;
        enter(&mut run, PrpStage::ContextEnriched);

        if let Some(outcome) = cancelled(&mut run, Some(&prp), ctx) {
            return outcome;
        }
        enter(&mut run, PrpStage::Executing);
        info!(task = %task.id, agent = %ctx.agent_id, attempt = assignment.attempt, "executing PRP");

        let started = Instant::now();
        let timeout = self.config.execution_timeout();
        let execution = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(FlowError::Cancelled(format!(
                "task '{}' was cancelled during execution", task.id
            ))),
            res = tokio::time::timeout(timeout, runtime.execute(&prp, ctx)) => res.map_err(|_| {
                FlowError::ExecutionFailure(format!(
                    "task '{}' timed out after {}s", task.id, timeout.as_secs()
                ))
            }),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut result = match execution {
            Ok(result) => result,
            Err(err) => {
                warn!(task = %task.id, error = %err, "execution aborted");
                enter(&mut run, PrpStage::Failed);
                let mut result = ExecutionResult::failure(&task.id, &ctx.agent_id, &err);
                result.duration_ms = elapsed_ms;
                return ProcessOutcome {
                    run,
                    prp: Some(prp),
                    result,
                };
            }
        };
        result.task_id = task.id.clone();
        result.agent_id = ctx.agent_id.clone();
        if result.duration_ms == 0 {
            result.duration_ms = elapsed_ms;
        }

        if !result.success {
            if result.error.is_none() {
                result.fail(&FlowError::ExecutionFailure(
                    "agent reported failure without detail".to_string(),
                ));
            }
            enter(&mut run, PrpStage::Failed);
            return ProcessOutcome {
                run,
                prp: Some(prp),
                result,
            };
        }

        enter(&mut run, PrpStage::PostValidated);
        let gates = self.run_gates(&prp, &result);
        if let Err(err) = gates.into_result() {
            warn!(task = %task.id, error = %err, "validation gate rejected result");
            result.fail(&err);
            enter(&mut run, PrpStage::Failed);
        } else {
            enter(&mut run, PrpStage::Completed);
        }

        ProcessOutcome {
            run,
            prp: Some(prp),
            result,
        }
    }
}

fn enter(run: &mut PrpRun, stage: PrpStage) {
    if let Err(e) = run.advance(stage) {
        warn!("{}", e);
    } else {
        debug!(task = %run.task_id, stage = %stage, "PRP stage");
    }
}

fn cancelled(run: &mut PrpRun, prp: Option<&AgentPrp>, ctx: &ExecutionContext) -> Option<ProcessOutcome> {
    if !ctx.cancel.is_cancelled() {
        return None;
    }
    let err = FlowError::Cancelled(format!("task '{}' was cancelled", run.task_id));
    info!(task = %run.task_id, stage = %run.stage(), "cancelled between stages");
    enter(run, PrpStage::Failed);
    Some(ProcessOutcome {
        run: run.clone(),
        prp: prp.cloned(),
        result: ExecutionResult::failure(&ctx.task_id, &ctx.agent_id, &err),
    })
}

fn snippet(hit: &ScoredEntry) -> ContextSnippet {
    ContextSnippet {
        entry_id: hit.entry.id.clone(),
        content: hit.entry.content.clone(),
        source_type: hit.entry.source_type,
        score: hit.score,
    }
}

fn first_line(content: &str) -> &str {
    content.lines().next().unwrap_or("").trim()
}
