use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_priority_ordering() {
    assert!(Priority::Low < Priority::Normal);
    assert!(Priority::Normal < Priority::High);
    assert!(Priority::High < Priority::Critical);
}

#[test]
fn test_priority_accepts_medium_alias() {
    let task: TaskSpecification = serde_yaml::from_str("id: t1\ntitle: T\npriority: medium\n").unwrap();
    assert_eq!(task.priority, Priority::Normal);
    assert_eq!(Priority::from_str("MEDIUM"), Some(Priority::Normal));
    assert_eq!(Priority::from_str("urgent"), None);
}

#[test]
fn test_task_specification_wire_schema() {
    let task = TaskSpecification::new("t1", "Write parser")
        .with_description("Parse the config format")
        .with_criterion("unit tests pass")
        .with_capability("coder")
        .with_dependency("t0");

    let json = serde_json::to_value(&task).unwrap();
    assert_eq!(json["id"], "t1");
    assert_eq!(json["priority"], "normal");
    assert_eq!(json["assigned_agent"], "coder");
    assert_eq!(json["dependencies"][0], "t0");
    assert_eq!(json["acceptance_criteria"][0], "unit tests pass");
}

#[test]
fn test_capability_or_falls_back() {
    let task = TaskSpecification::new("t1", "T");
    assert_eq!(task.capability_or("coder"), "coder");

    let task = task.with_capability("tester");
    assert_eq!(task.capability_or("coder"), "tester");
}

#[test]
fn test_task_state_terminal() {
    assert!(TaskState::Completed.is_terminal());
    assert!(TaskState::Failed.is_terminal());
    assert!(TaskState::Cancelled.is_terminal());
    assert!(!TaskState::InProgress.is_terminal());
    assert_eq!(TaskState::InProgress.to_string(), "in_progress");
}

#[test]
fn test_feature_request_from_yaml_with_tasks() {
    let yaml = r#"
title: Rate limiting
description: Limit requests per key
requirements: [sliding window]
tasks:
  - id: a
    title: Build limiter
    acceptance_criteria: ["limiter works"]
  - id: b
    title: Test limiter
    dependencies: [a]
    priority: critical
"#;
    let request = FeatureRequest::from_yaml(yaml).unwrap();
    assert_eq!(request.tasks.len(), 2);
    assert_eq!(request.tasks[1].dependencies, vec!["a"]);
    assert_eq!(request.tasks[1].priority, Priority::Critical);
}

#[test]
fn test_feature_request_rejects_empty_title() {
    let err = FeatureRequest::from_yaml("title: '  '\n").unwrap_err();
    assert!(err.to_string().contains("empty title"));
}

#[test]
fn test_feature_request_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "title: Export\ndescription: CSV export").unwrap();

    let request = FeatureRequest::load(file.path()).unwrap();
    assert_eq!(request.title, "Export");
    assert!(request.tasks.is_empty());
}

#[test]
fn test_feature_request_load_missing_file() {
    let err = FeatureRequest::load("/nonexistent/feature.yaml").unwrap_err();
    assert!(err.to_string().contains("failed to read feature file"));
}
