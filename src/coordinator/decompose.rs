//! Feature request -> task specifications.

use crate::agent::prompt::{render_template, vars};
use crate::config::{CoordinatorConfig, PipelineStage};
use crate::error::Result;
use crate::task::{FeatureRequest, TaskSpecification};

const DEFAULT_STAGE_DESCRIPTION: &str = "{description}";

/// Split `request` into tasks.
///
/// Explicit `tasks` win; otherwise the configured pipeline is expanded.
/// Feature-level acceptance criteria are appended to every task, and tasks
/// without a capability get the coordinator default.
pub fn decompose(request: &FeatureRequest, config: &CoordinatorConfig) -> Result<Vec<TaskSpecification>> {
    let mut tasks = if request.tasks.is_empty() {
        config
            .pipeline
            .iter()
            .map(|stage| expand_stage(stage, request))
            .collect::<Result<Vec<_>>>()?
    } else {
        request.tasks.clone()
    };

    for task in &mut tasks {
        for criterion in &request.acceptance_criteria {
            if !task.acceptance_criteria.contains(criterion) {
                task.acceptance_criteria.push(criterion.clone());
            }
        }
        if task.assigned_agent.is_none() {
            task.assigned_agent = Some(config.default_capability.clone());
        }
    }

    Ok(tasks)
}

fn expand_stage(stage: &PipelineStage, request: &FeatureRequest) -> Result<TaskSpecification> {
    let description = if request.description.trim().is_empty() {
        request.title.as_str()
    } else {
        request.description.as_str()
    };
    let variables = vars([
        ("title", request.title.as_str()),
        ("description", description),
        ("stage", stage.name.as_str()),
    ]);
    let origin = format!("pipeline stage '{}'", stage.name);

    let title = render_template(&stage.title, &variables).map_err(|e| e.in_template(&origin))?;
    let description = render_template(
        stage.description.as_deref().unwrap_or(DEFAULT_STAGE_DESCRIPTION),
        &variables,
    )
    .map_err(|e| e.in_template(&origin))?;

    Ok(TaskSpecification {
        id: stage.name.clone(),
        title,
        description,
        requirements: request.requirements.clone(),
        acceptance_criteria: stage.acceptance_criteria.clone(),
        priority: stage.priority.unwrap_or(request.priority),
        assigned_agent: Some(stage.capability.clone()),
        dependencies: stage.depends_on.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_pipeline;
    use crate::error::FlowError;
    use crate::task::Priority;

    fn request() -> FeatureRequest {
        let mut request = FeatureRequest::new(
            "Rate limiting",
            "Throttle clients per API key",
            vec!["Use a token bucket".to_string()],
        );
        request.acceptance_criteria = vec!["No regressions".to_string()];
        request.priority = Priority::High;
        request
    }

    #[test]
    fn test_default_pipeline_expansion() {
        let tasks = decompose(&request(), &CoordinatorConfig::default()).unwrap();
        let ids: Vec<_> = tasks.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["implement", "test", "review", "deploy"]);

        let implement = &tasks[0];
        assert_eq!(implement.title, "Implement Rate limiting");
        assert_eq!(implement.description, "Throttle clients per API key");
        assert_eq!(implement.assigned_agent.as_deref(), Some("coder"));
        assert_eq!(implement.priority, Priority::High);
        assert_eq!(implement.requirements, vec!["Use a token bucket"]);
        assert_eq!(
            implement.acceptance_criteria,
            vec!["Implementation is complete", "No regressions"]
        );

        let deploy = &tasks[3];
        assert_eq!(deploy.dependencies, vec!["test", "review"]);
        assert_eq!(deploy.assigned_agent.as_deref(), Some("devops"));
    }

    #[test]
    fn test_explicit_tasks_get_feature_criteria_and_default_capability() {
        let request = request()
            .with_task(
                TaskSpecification::new("schema", "Add schema")
                    .with_description("Create tables")
                    .with_criterion("No regressions"),
            )
            .with_task(
                TaskSpecification::new("api", "Expose API")
                    .with_description("Add endpoints")
                    .with_capability("backend")
                    .with_dependency("schema"),
            );
        let tasks = decompose(&request, &CoordinatorConfig::default()).unwrap();

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].assigned_agent.as_deref(), Some("coder"));
        assert_eq!(tasks[0].acceptance_criteria, vec!["No regressions"]);
        assert_eq!(tasks[1].assigned_agent.as_deref(), Some("backend"));
        assert_eq!(tasks[1].acceptance_criteria, vec!["No regressions"]);
    }

    #[test]
    fn test_empty_description_falls_back_to_title() {
        let request = FeatureRequest::new("Dark mode", "", Vec::new());
        let tasks = decompose(&request, &CoordinatorConfig::default()).unwrap();
        assert_eq!(tasks[0].description, "Dark mode");
    }

    #[test]
    fn test_stage_template_error_names_stage() {
        let mut config = CoordinatorConfig::default();
        let mut stages = default_pipeline();
        stages[0].title = "Implement {feature}".to_string();
        config.pipeline = stages;

        let err = decompose(&request(), &config).unwrap_err();
        match err {
            FlowError::UserError(msg) => {
                assert!(msg.contains("feature"));
                assert!(msg.contains("pipeline stage 'implement'"));
            }
            other => panic!("expected UserError, got {other:?}"),
        }
    }
}
