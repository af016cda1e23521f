//! Template variables derived from a PRP.

use crate::agent::ExecutionContext;
use crate::prp::AgentPrp;
use std::collections::HashMap;

/// Everything a prompt or command template may reference.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub task_id: String,
    pub feature_id: String,
    pub agent_id: String,
    pub capability: String,
    pub attempt: u32,
    pub goal: String,
    pub justification: String,
    pub implementation_steps: Vec<String>,
    pub validation_criteria: Vec<String>,
    pub success_metrics: Vec<String>,
    pub failure_recovery: Vec<String>,
    /// Rendered knowledge snippets, best match first.
    pub context: Vec<String>,
}

impl PromptContext {
    pub fn new(prp: &AgentPrp, ctx: &ExecutionContext, capability: &str) -> Self {
        let mut context: Vec<String> = prp
            .context
            .iter()
            .map(|s| format!("[{} {:.2}] {}", s.source_type, s.score, s.content.trim()))
            .collect();
        for (name, values) in &prp.references {
            if name != "full_context" {
                context.extend(values.iter().map(|v| format!("{}: {}", name, v)));
            }
        }

        Self {
            task_id: ctx.task_id.clone(),
            feature_id: ctx.feature_id.clone(),
            agent_id: ctx.agent_id.clone(),
            capability: capability.to_string(),
            attempt: ctx.attempt,
            goal: prp.goal.clone(),
            justification: prp.justification.clone(),
            implementation_steps: prp.implementation_steps.clone(),
            validation_criteria: prp.validation_criteria.clone(),
            success_metrics: prp.success_metrics.clone(),
            failure_recovery: prp.failure_recovery.clone(),
            context,
        }
    }

    /// Variables for `render_template`. Lists render as Markdown lists.
    pub fn to_template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("task_id".to_string(), self.task_id.clone());
        vars.insert("feature_id".to_string(), self.feature_id.clone());
        vars.insert("agent_id".to_string(), self.agent_id.clone());
        vars.insert("capability".to_string(), self.capability.clone());
        vars.insert("attempt".to_string(), self.attempt.to_string());
        vars.insert("goal".to_string(), self.goal.clone());
        vars.insert("title".to_string(), self.goal.clone());
        vars.insert("justification".to_string(), self.justification.clone());

        vars.insert(
            "implementation_steps".to_string(),
            numbered(&self.implementation_steps),
        );
        vars.insert(
            "validation_criteria".to_string(),
            bulleted(&self.validation_criteria),
        );
        vars.insert("success_metrics".to_string(), bulleted(&self.success_metrics));
        vars.insert("failure_recovery".to_string(), bulleted(&self.failure_recovery));
        vars.insert("context".to_string(), bulleted(&self.context));

        vars
    }
}

fn bulleted(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|item| format!("- {}", item))
        .collect::<Vec<_>>()
        .join("\n")
}

fn numbered(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item))
        .collect::<Vec<_>>()
        .join("\n")
}
