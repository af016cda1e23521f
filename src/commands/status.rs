//! Implementation of the `prpflow status` command, and the `status.json`
//! snapshot that `run` writes for it.

use crate::cli::StatusArgs;
use crate::context::{FlowContext, require_initialized};
use crate::coordinator::FeatureSnapshot;
use crate::error::{FlowError, Result};
use crate::fs::atomic_write_file;
use crate::health::HealthReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Contents of `.prpflow/status.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatus {
    pub written_at: DateTime<Utc>,
    pub feature: FeatureSnapshot,
    pub health: HealthReport,
}

impl RunStatus {
    pub fn new(feature: FeatureSnapshot, health: HealthReport) -> Self {
        Self {
            written_at: Utc::now(),
            feature,
            health,
        }
    }

    pub fn write(&self, ctx: &FlowContext) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| FlowError::UserError(format!("failed to serialize status: {}", e)))?;
        atomic_write_file(ctx.status_path(), &json)
    }

    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FlowError::UserError(
                "no run has been recorded yet.\n\nFix: run `prpflow run <feature.yaml>` first."
                    .to_string(),
            ));
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::UserError(format!("failed to read '{}': {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            FlowError::UserError(format!("failed to parse '{}': {}", path.display(), e))
        })
    }
}

pub fn cmd_status(args: StatusArgs) -> Result<()> {
    let ctx = require_initialized()?;

    if args.json {
        let path = ctx.status_path();
        let content = std::fs::read_to_string(&path).map_err(|_| {
            FlowError::UserError(
                "no run has been recorded yet.\n\nFix: run `prpflow run <feature.yaml>` first."
                    .to_string(),
            )
        })?;
        println!("{}", content.trim_end());
        return Ok(());
    }

    let status = RunStatus::read(&ctx.status_path())?;
    print_snapshot(&status.feature);
    print_health(&status.health);
    println!();
    println!("Snapshot taken {}", status.written_at.to_rfc3339());
    Ok(())
}

pub(crate) fn print_snapshot(snapshot: &FeatureSnapshot) {
    println!("Feature {} ({})", snapshot.feature_id, snapshot.title);
    println!("Status:  {}", snapshot.status);
    if let Some(finished) = snapshot.finished_at {
        let secs = (finished - snapshot.created_at).num_milliseconds() as f64 / 1000.0;
        println!("Took:    {:.1}s", secs);
    }
    println!();
    println!("  {:<14} {:<10} {:<12} {:>8}  {}", "TASK", "AGENT", "STATE", "ATTEMPTS", "CLAIMANT");
    for task in &snapshot.tasks {
        println!(
            "  {:<14} {:<10} {:<12} {:>8}  {}",
            task.id,
            task.capability,
            task.state,
            task.attempts,
            task.claimant.as_deref().unwrap_or("-")
        );
        if let Some(error) = &task.last_error {
            println!("  {:<14} {}", "", error);
        }
    }
}

fn print_health(health: &HealthReport) {
    if health.agents.is_empty() {
        return;
    }
    println!();
    println!("Agents ({} alive):", health.alive_agents());
    for agent in &health.agents {
        let marker = if agent.alive { "" } else { " [SILENT]" };
        println!(
            "  {:<16} {:<8} {}{}",
            agent.agent_id,
            agent.status.as_str(),
            agent.current_task.as_deref().unwrap_or("-"),
            marker
        );
    }
}
