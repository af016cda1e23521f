//! Implementation of the `prpflow validate` command.
//!
//! Plans a feature exactly as `run` would (decomposition, structural
//! validation, cycle detection) and prints the dependency waves. Nothing is
//! published and no agent runs.

use crate::cli::ValidateArgs;
use crate::config::Config;
use crate::context::FlowContext;
use crate::coordinator::{Coordinator, Plan};
use crate::error::Result;
use crate::events::EventLog;
use crate::knowledge::{HashingEmbedder, KnowledgeStore, StoreRetriever};
use crate::prp::PrpProcessor;
use crate::task::FeatureRequest;
use crate::transport::MessageBus;
use std::sync::Arc;

pub fn cmd_validate(args: ValidateArgs) -> Result<()> {
    let ctx = FlowContext::resolve()?;
    let config = ctx.load_config()?;
    let request = FeatureRequest::load(&args.feature)?;

    let plan = plan_feature(&config, &request)?;
    print_plan(&request, &plan, &config);
    Ok(())
}

/// Plan without starting anything: the coordinator is never started and
/// the knowledge store stays empty.
pub(crate) fn plan_feature(config: &Config, request: &FeatureRequest) -> Result<Plan> {
    let dimension = config.knowledge.embedding_dimension;
    let store = Arc::new(KnowledgeStore::new(dimension));
    let retriever = StoreRetriever::new(store, Arc::new(HashingEmbedder::new(dimension)));
    let processor = PrpProcessor::new(Arc::new(retriever), config.prp.clone());
    let coordinator = Coordinator::new(
        config.coordinator.clone(),
        &config.transport,
        Arc::new(MessageBus::new(&config.transport)),
        Arc::new(processor),
        Arc::new(EventLog::disabled()),
    );
    coordinator.plan(request)
}

fn print_plan(request: &FeatureRequest, plan: &Plan, config: &Config) {
    println!("Feature: {}", request.title);
    println!("Tasks:   {}", plan.tasks.len());
    println!();

    for (n, wave) in plan.graph.waves().iter().enumerate() {
        println!("Wave {}:", n + 1);
        for id in wave {
            let Some(task) = plan.tasks.iter().find(|t| &t.id == id) else {
                continue;
            };
            println!(
                "  {:<12} [{}] {} (priority {})",
                task.id,
                task.capability_or(&config.coordinator.default_capability),
                task.title,
                task.priority.as_str()
            );
            if !task.dependencies.is_empty() {
                println!("  {:<12} after: {}", "", task.dependencies.join(", "));
            }
        }
    }
    println!();
    println!("Plan is valid.");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FlowError;
    use crate::task::TaskSpecification;

    fn task(id: &str) -> TaskSpecification {
        TaskSpecification::new(id, format!("Do {}", id))
            .with_description("Some work")
            .with_criterion("It works")
    }

    #[test]
    fn test_plan_default_pipeline() {
        let request = FeatureRequest::new("Export CSV", "Users can export reports", Vec::new());
        let plan = plan_feature(&Config::default(), &request).unwrap();

        let waves = plan.graph.waves();
        assert_eq!(waves.len(), 3);
        assert_eq!(waves[0], vec!["implement"]);
        assert_eq!(waves[1], vec!["review", "test"]);
        assert_eq!(waves[2], vec!["deploy"]);
    }

    #[test]
    fn test_plan_reports_cycle() {
        let request = FeatureRequest::new("Loop", "", Vec::new())
            .with_task(task("a").with_dependency("b"))
            .with_task(task("b").with_dependency("a"));

        let err = plan_feature(&Config::default(), &request).unwrap_err();
        assert!(matches!(err, FlowError::CyclicDependency { .. }));
        assert_eq!(err.exit_code(), crate::exit_codes::VALIDATION_FAILURE);
    }

    #[test]
    fn test_validate_reads_feature_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("feature.yaml");
        std::fs::write(
            &path,
            "title: Export CSV\ndescription: Users can export reports\n",
        )
        .unwrap();

        let request = FeatureRequest::load(&path).unwrap();
        assert!(plan_feature(&Config::default(), &request).is_ok());
    }
}
