//! The capability interface every agent kind implements.

use crate::knowledge::KnowledgeStore;
use crate::prp::{AgentPrp, ExecutionResult};
use crate::transport::TaskAssignment;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-execution handles passed to [`AgentRuntime::execute`].
#[derive(Clone)]
pub struct ExecutionContext {
    pub agent_id: String,
    pub feature_id: String,
    pub task_id: String,
    pub correlation_id: String,
    pub attempt: u32,
    /// Agents may record intermediate findings here.
    pub knowledge: Arc<KnowledgeStore>,
    /// Fires when the feature is cancelled. Check it between steps.
    pub cancel: CancellationToken,
}

/// One kind of agent (coder, tester, reviewer, ...).
///
/// A runtime instance runs at most one PRP at a time; the worker driving it
/// guarantees that. Runtimes never change task state themselves.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    fn capability(&self) -> &str;

    /// Fast, side-effect-free admission check.
    fn accept(&self, assignment: &TaskAssignment) -> bool {
        assignment.task.assigned_agent.as_deref() == Some(self.capability())
            && assignment.dependencies_met()
    }

    async fn execute(&self, prp: &AgentPrp, ctx: &ExecutionContext) -> ExecutionResult;
}

/// Attests every validation criterion without doing any work.
///
/// Used by `prpflow run --dry-run` to exercise scheduling end to end.
pub struct DryRunAgent {
    capability: String,
}

impl DryRunAgent {
    pub fn new(capability: impl Into<String>) -> Self {
        Self {
            capability: capability.into(),
        }
    }
}

#[async_trait]
impl AgentRuntime for DryRunAgent {
    fn capability(&self) -> &str {
        &self.capability
    }

    async fn execute(&self, prp: &AgentPrp, ctx: &ExecutionContext) -> ExecutionResult {
        let mut result = ExecutionResult::success(&prp.task_id, &ctx.agent_id)
            .with_approach(format!("dry run of {} steps", prp.implementation_steps.len()));
        for criterion in &prp.validation_criteria {
            result = result.with_criterion(criterion.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prp::GateOutcome;
    use crate::task::TaskSpecification;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            agent_id: "coder-1".into(),
            feature_id: "f".into(),
            task_id: "t".into(),
            correlation_id: "c".into(),
            attempt: 1,
            knowledge: Arc::new(KnowledgeStore::new(8)),
            cancel: CancellationToken::new(),
        }
    }

    fn assignment(task: TaskSpecification, done: &[&str]) -> TaskAssignment {
        TaskAssignment {
            feature_id: "f".into(),
            task,
            attempt: 1,
            completed_dependencies: done.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_accept_requires_capability_and_dependencies() {
        let agent = DryRunAgent::new("tester");
        let task = TaskSpecification::new("test", "Test").with_dependency("implement");

        assert!(!agent.accept(&assignment(task.clone().with_capability("tester"), &[])));
        assert!(agent.accept(&assignment(task.clone().with_capability("tester"), &["implement"])));
        assert!(!agent.accept(&assignment(task.with_capability("coder"), &["implement"])));
    }

    #[tokio::test]
    async fn test_dry_run_passes_attested_gates() {
        let prp = AgentPrp {
            task_id: "t".into(),
            validation_criteria: vec!["unit tests pass".into(), "docs updated".into()],
            ..AgentPrp::default()
        };
        let result = DryRunAgent::new("coder").execute(&prp, &ctx()).await;
        assert!(result.success);
        assert!(GateOutcome::evaluate(&prp, &result).passed);
    }
}
