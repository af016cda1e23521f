//! Implementation of the `prpflow run` command.
//!
//! 1. Plan the feature (same checks as `validate`)
//! 2. Bind every required capability to an agent profile, or to dry-run agents
//! 3. Open the knowledge store and event log under `.prpflow/`
//! 4. Start a swarm, submit, and wait for the outcome (bounded by
//!    `--timeout-secs`, interrupted by Ctrl-C)
//! 5. Write `.prpflow/status.json` and print the outcome
//!
//! A feature that does not complete is reported through the exit code.

use super::status::{RunStatus, print_snapshot};
use super::validate_cmd::plan_feature;
use crate::agent::{AgentsConfig, resolve_bindings};
use crate::cli::RunArgs;
use crate::context::{FlowContext, require_initialized};
use crate::coordinator::{FeatureOutcome, FeatureStatus};
use crate::error::{FlowError, Result};
use crate::events::EventLog;
use crate::knowledge::KnowledgeStore;
use crate::system::{Swarm, SwarmBuilder};
use crate::task::FeatureRequest;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub async fn cmd_run(args: RunArgs) -> Result<()> {
    let ctx = require_initialized()?;
    let config = ctx.load_config()?;
    let request = FeatureRequest::load(&args.feature)?;

    let plan = plan_feature(&config, &request)?;
    let required: BTreeSet<String> = plan
        .tasks
        .iter()
        .map(|t| t.capability_or(&config.coordinator.default_capability).to_string())
        .collect();

    let agents = AgentsConfig::load(ctx.agents_path())?.unwrap_or_default();
    let bindings = resolve_bindings(
        &required,
        &agents,
        &ctx,
        config.agents.max_concurrent,
        args.dry_run,
    )?;

    let knowledge = open_knowledge(&ctx, config.knowledge.persist, config.knowledge.embedding_dimension)?;
    let events = Arc::new(EventLog::new(ctx.events_path()));
    let swarm = bindings
        .into_iter()
        .fold(
            Swarm::builder(config).events(events).knowledge(knowledge),
            SwarmBuilder::binding,
        )
        .build()?;

    let feature_id = swarm.submit(request).await?;
    info!(feature = %feature_id, tasks = plan.tasks.len(), dry_run = args.dry_run, "feature submitted");

    let timeout = args.timeout_secs.map(Duration::from_secs);
    let deadline = async {
        match timeout {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending::<()>().await,
        }
    };

    let outcome = tokio::select! {
        outcome = swarm.wait(&feature_id) => outcome,
        _ = deadline => {
            warn!(feature = %feature_id, "feature timed out, cancelling");
            swarm.cancel(&feature_id).await?;
            swarm.wait(&feature_id).await
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(feature = %feature_id, "interrupted, cancelling");
            swarm.cancel(&feature_id).await?;
            swarm.wait(&feature_id).await
        }
    }?;

    let snapshot = swarm.status(&feature_id)?;
    RunStatus::new(snapshot.clone(), swarm.health()).write(&ctx)?;
    swarm.shutdown().await;

    print_snapshot(&snapshot);
    println!();
    println!("Status written to {}", ctx.status_path().display());

    outcome_to_result(&outcome)
}

fn open_knowledge(ctx: &FlowContext, persist: bool, dimension: usize) -> Result<Arc<KnowledgeStore>> {
    let store = if persist {
        KnowledgeStore::open(ctx.knowledge_path(), dimension)?
    } else {
        KnowledgeStore::new(dimension)
    };
    Ok(Arc::new(store))
}

fn outcome_to_result(outcome: &FeatureOutcome) -> Result<()> {
    match outcome.status {
        FeatureStatus::Completed => Ok(()),
        FeatureStatus::Cancelled => Err(FlowError::Cancelled(format!(
            "feature '{}' was cancelled",
            outcome.title
        ))),
        FeatureStatus::Failed | FeatureStatus::Running => Err(FlowError::ExecutionFailure(format!(
            "feature '{}' failed; failed tasks: {}",
            outcome.title,
            if outcome.failed_tasks.is_empty() {
                "(none)".to_string()
            } else {
                outcome.failed_tasks.join(", ")
            }
        ))),
    }
}
