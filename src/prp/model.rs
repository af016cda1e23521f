use crate::error::{FailureKind, FlowError};
use crate::knowledge::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Knowledge entry folded into a PRP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnippet {
    pub entry_id: String,
    pub content: String,
    pub source_type: SourceType,
    pub score: f32,
}

/// Enriched, executable form of a task specification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentPrp {
    #[serde(default)]
    pub task_id: String,
    pub goal: String,
    pub justification: String,
    #[serde(default)]
    pub context: Vec<ContextSnippet>,
    /// Named reference lists: `documentation_urls`, `file_references`,
    /// `gotchas`, `patterns`, `full_context`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, Vec<String>>,
    pub implementation_steps: Vec<String>,
    pub validation_criteria: Vec<String>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
    #[serde(default)]
    pub failure_recovery: Vec<String>,
    /// Things that went wrong while enriching (e.g. retrieval timeout).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrichment_notes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warning),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

/// Failure detail of an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&FlowError> for TaskError {
    fn from(err: &FlowError) -> Self {
        Self {
            kind: err.failure_kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Outcome of running one PRP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Textual criteria the agent reports as met.
    #[serde(default)]
    pub satisfied_criteria: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Short description of how the work was done.
    #[serde(default)]
    pub approach: Option<String>,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(task_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            success: true,
            artifacts: Vec::new(),
            findings: Vec::new(),
            satisfied_criteria: Vec::new(),
            metrics: BTreeMap::new(),
            approach: None,
            error: None,
            duration_ms: 0,
            finished_at: Utc::now(),
        }
    }

    pub fn failure(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        err: &FlowError,
    ) -> Self {
        let mut result = Self::success(task_id, agent_id);
        result.fail(err);
        result
    }

    /// Turn this result into a failure, keeping whatever the agent reported.
    pub fn fail(&mut self, err: &FlowError) {
        self.success = false;
        self.error = Some(TaskError::from(err));
        self.finished_at = Utc::now();
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifacts.push(artifact.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.satisfied_criteria.push(criterion.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_finding(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.findings.push(Finding {
            severity,
            message: message.into(),
        });
        self
    }

    pub fn with_approach(mut self, approach: impl Into<String>) -> Self {
        self.approach = Some(approach.into());
        self
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Structural validation of a task specification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub task_id: String,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// `MalformedTask` when any rule failed.
    pub fn into_result(self) -> crate::error::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(FlowError::MalformedTask {
                task_id: self.task_id,
                errors: self.errors,
            })
        }
    }
}
