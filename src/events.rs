//! Append-only NDJSON audit log of lifecycle events.
//!
//! One JSON object per line in `.prpflow/events.ndjson`:
//! - `ts`: RFC3339 timestamp
//! - `action`: what happened (`task_claim`, `feature_complete`, ...)
//! - `actor`: `user@HOST` of the process
//! - `feature`, `task`: ids, when the event concerns one
//! - `details`: freeform, action-specific
//!
//! The log is observability, not state: [`EventLog::record`] logs write
//! failures and carries on.

use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::warn;

static ACTOR: LazyLock<String> = LazyLock::new(actor_string);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    FeatureSubmit,
    FeatureReject,
    TaskQueue,
    TaskClaim,
    TaskStart,
    TaskComplete,
    TaskFail,
    TaskRetry,
    TaskCancel,
    FeatureComplete,
    FeatureCancel,
    DeadLetter,
    PatternStore,
}

impl EventAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventAction::FeatureSubmit => "feature_submit",
            EventAction::FeatureReject => "feature_reject",
            EventAction::TaskQueue => "task_queue",
            EventAction::TaskClaim => "task_claim",
            EventAction::TaskStart => "task_start",
            EventAction::TaskComplete => "task_complete",
            EventAction::TaskFail => "task_fail",
            EventAction::TaskRetry => "task_retry",
            EventAction::TaskCancel => "task_cancel",
            EventAction::FeatureComplete => "feature_complete",
            EventAction::FeatureCancel => "feature_cancel",
            EventAction::DeadLetter => "dead_letter",
            EventAction::PatternStore => "pattern_store",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: DateTime<Utc>,
    pub action: EventAction,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    pub details: Value,
}

impl Event {
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: ACTOR.clone(),
            feature: None,
            task: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_feature(mut self, feature_id: impl Into<String>) -> Self {
        self.feature = Some(feature_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task = Some(task_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| FlowError::UserError(format!("failed to serialize event to JSON: {}", e)))
    }
}

fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}@{}", user, host)
}

/// Append one event line to `path`, creating the file and its directory.
pub fn append_event(path: &Path, event: &Event) -> Result<()> {
    let line = event.to_ndjson_line()?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| {
            FlowError::UserError(format!(
                "failed to create events directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            FlowError::UserError(format!(
                "failed to open events file '{}': {}",
                path.display(),
                e
            ))
        })?;
    writeln!(file, "{}", line).map_err(|e| {
        FlowError::UserError(format!(
            "failed to append to events file '{}': {}",
            path.display(),
            e
        ))
    })
}

/// Read every event in `path`. A missing file reads as empty.
pub fn read_events(path: &Path) -> Result<Vec<Event>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path).map_err(|e| {
        FlowError::UserError(format!(
            "failed to read events file '{}': {}",
            path.display(),
            e
        ))
    })?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                FlowError::UserError(format!(
                    "failed to parse event on line {} of '{}': {}",
                    i + 1,
                    path.display(),
                    e
                ))
            })
        })
        .collect()
}

/// Shared sink for lifecycle events; a disabled log drops everything.
#[derive(Debug, Default)]
pub struct EventLog {
    path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append `event`; failures are logged and swallowed.
    pub fn record(&self, event: Event) {
        let Some(path) = &self.path else {
            return;
        };
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = append_event(path, &event) {
            warn!(action = %event.action, error = %e, "failed to record event");
        }
    }
}
