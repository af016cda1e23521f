//! Task and feature model for prpflow.
//!
//! A caller submits a [`FeatureRequest`]; the coordinator decomposes it into
//! [`TaskSpecification`]s linked by dependency ids. Feature requests are
//! authored as YAML:
//!
//! ```text
//! title: Add rate limiting
//! description: Limit requests per API key
//! requirements:
//!   - sliding window
//! priority: high
//! ```
//!
//! An explicit `tasks:` list replaces the configured default pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

mod io;
#[cfg(test)]
mod tests;

/// Task priority. Ordered: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    #[serde(alias = "medium")]
    Normal,
    High,
    Critical,
}

impl Priority {
    /// Parse a priority from a string. `medium` is accepted for `normal`.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit of assignable work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpecification {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub requirements: Vec<String>,

    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Capability tag of the agent kind that should run this task.
    #[serde(default)]
    pub assigned_agent: Option<String>,

    /// Ids of tasks in the same feature that must complete first.
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl TaskSpecification {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            requirements: Vec::new(),
            acceptance_criteria: Vec::new(),
            priority: Priority::Normal,
            assigned_agent: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_requirement(mut self, requirement: impl Into<String>) -> Self {
        self.requirements.push(requirement.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.assigned_agent = Some(capability.into());
        self
    }

    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Capability tag, falling back to `default` when unset.
    pub fn capability_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.assigned_agent
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(default)
    }
}

/// Lifecycle state of a task inside the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for dependencies to complete.
    Pending,
    /// Assignment published, not yet claimed.
    Queued,
    Claimed,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Queued => "queued",
            TaskState::Claimed => "claimed",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound request for a unit of feature work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub requirements: Vec<String>,

    /// Criteria appended to every decomposed task.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,

    #[serde(default)]
    pub priority: Priority,

    /// Explicit decomposition; empty means "use the configured pipeline".
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskSpecification>,
}

impl FeatureRequest {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        requirements: Vec<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            requirements,
            acceptance_criteria: Vec::new(),
            priority: Priority::Normal,
            tasks: Vec::new(),
        }
    }

    pub fn with_task(mut self, task: TaskSpecification) -> Self {
        self.tasks.push(task);
        self
    }
}
