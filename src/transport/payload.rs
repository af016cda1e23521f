//! Kind-specific payloads carried inside [`AgentMessage`](super::AgentMessage).

use super::AgentMessage;
use crate::prp::ExecutionResult;
use crate::task::{TaskSpecification, TaskState};
use serde::{Deserialize, Serialize};

/// Payload of a `task_assignment` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignment {
    pub feature_id: String,
    pub task: TaskSpecification,
    /// 1-based execution attempt; each attempt has its own correlation id.
    pub attempt: u32,
    /// Dependencies the coordinator had recorded as completed at publish time.
    #[serde(default)]
    pub completed_dependencies: Vec<String>,
}

impl TaskAssignment {
    /// Dependencies not yet reported as completed.
    pub fn unmet_dependencies(&self) -> Vec<&str> {
        self.task
            .dependencies
            .iter()
            .filter(|dep| !self.completed_dependencies.contains(dep))
            .map(String::as_str)
            .collect()
    }

    pub fn dependencies_met(&self) -> bool {
        self.unmet_dependencies().is_empty()
    }
}

/// Payload of a `task_result` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskReport {
    pub feature_id: String,
    pub task: TaskSpecification,
    pub attempt: u32,
    pub agent_id: String,
    pub capability: String,
    pub result: ExecutionResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Busy,
    Stopping,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Busy => "busy",
            AgentStatus::Stopping => "stopping",
        }
    }
}

/// Payload of a `heartbeat` message.
///
/// Workers send one periodically and one when they start work on a claimed
/// task; the latter carries `progress: in_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub capability: String,
    pub status: AgentStatus,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub progress: Option<TaskState>,
}

/// Payload of an `error` message on the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub topic: String,
    pub subscriber: u64,
    pub attempts: u32,
    pub reason: String,
    pub original: Box<AgentMessage>,
}
