//! Configuration model for prpflow.
//!
//! This module defines the Config struct that represents `.prpflow/config.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for every field, and validation of config values.

use crate::error::{FlowError, Result};
use crate::task::Priority;
use crate::transport::Backoff;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Root configuration loaded from `.prpflow/config.yaml`.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportConfig,
    pub knowledge: KnowledgeConfig,
    pub prp: PrpConfig,
    pub coordinator: CoordinatorConfig,
    pub agents: AgentsRuntimeConfig,
    pub learner: LearnerConfig,
    pub logging: LoggingConfig,
}

// =========================================================================
// Message transport
// =========================================================================

/// Delivery tuning for the in-process message bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Buffered messages per subscription before delivery backs off.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,

    /// Delivery attempts per subscriber before a message is dead-lettered.
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Number of (correlation id, message id) keys consumers remember.
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
}

impl TransportConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            self.backoff_factor,
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

// =========================================================================
// Knowledge store
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Width every stored and queried embedding must have.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Journal entries to `.prpflow/knowledge.ndjson`.
    #[serde(default = "default_true")]
    pub persist: bool,
}

// =========================================================================
// PRP processing
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrpConfig {
    /// Number of knowledge entries folded into each PRP.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Enrichment gives up after this long and proceeds without context.
    #[serde(default = "default_retrieval_timeout_ms")]
    pub retrieval_timeout_ms: u64,

    /// Upper bound on a single agent execution.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Minimum number of words in the goal of a Markdown PRP document.
    #[serde(default = "default_min_goal_words")]
    pub min_goal_words: usize,
}

impl PrpConfig {
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

// =========================================================================
// Task coordinator
// =========================================================================

/// One stage of the default feature decomposition.
///
/// `title` and `description` are templates rendered with the feature's
/// `{title}` and `{description}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: String,
    pub capability: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
}

impl PipelineStage {
    fn new(
        name: &str,
        capability: &str,
        title: &str,
        depends_on: &[&str],
        criterion: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            capability: capability.to_string(),
            title: title.to_string(),
            description: None,
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            acceptance_criteria: vec![criterion.to_string()],
            priority: None,
        }
    }
}

/// Default decomposition: implement, then test and review, then deploy.
pub fn default_pipeline() -> Vec<PipelineStage> {
    vec![
        PipelineStage::new(
            "implement",
            "coder",
            "Implement {title}",
            &[],
            "Implementation is complete",
        ),
        PipelineStage::new(
            "test",
            "tester",
            "Test {title}",
            &["implement"],
            "Tests pass",
        ),
        PipelineStage::new(
            "review",
            "reviewer",
            "Review {title}",
            &["implement"],
            "Review is approved",
        ),
        PipelineStage::new(
            "deploy",
            "devops",
            "Deploy {title}",
            &["test", "review"],
            "Deployment is verified",
        ),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Executions per task before it is permanently failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_base_ms")]
    pub retry_backoff_base_ms: u64,

    #[serde(default = "default_retry_backoff_max_ms")]
    pub retry_backoff_max_ms: u64,

    /// Queued assignments nobody claimed are re-published after this long.
    #[serde(default = "default_assignment_timeout_secs")]
    pub assignment_timeout_secs: u64,

    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,

    /// Claimed or in-progress tasks older than this are failed.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Capability used for tasks that do not name one.
    #[serde(default = "default_capability")]
    pub default_capability: String,

    #[serde(default = "default_pipeline")]
    pub pipeline: Vec<PipelineStage>,
}

impl CoordinatorConfig {
    pub fn retry_backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.retry_backoff_base_ms),
            2.0,
            Duration::from_millis(self.retry_backoff_max_ms),
        )
    }
}

// =========================================================================
// Agents
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsRuntimeConfig {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// An agent without a heartbeat for this long is reported dead.
    #[serde(default = "default_liveness_timeout_secs")]
    pub liveness_timeout_secs: u64,

    /// Upper bound on worker instances per capability.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

// =========================================================================
// Outcome learner
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_max_store_attempts")]
    pub max_store_attempts: u32,

    #[serde(default = "default_learner_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

// =========================================================================
// Logging
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_subscriber_capacity() -> usize {
    256
}
fn default_max_delivery_attempts() -> u32 {
    5
}
fn default_backoff_base_ms() -> u64 {
    10
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_backoff_max_ms() -> u64 {
    1000
}
fn default_dedup_capacity() -> usize {
    4096
}
fn default_embedding_dimension() -> usize {
    256
}
fn default_top_k() -> usize {
    5
}
fn default_retrieval_timeout_ms() -> u64 {
    2000
}
fn default_execution_timeout_secs() -> u64 {
    3600
}
fn default_min_goal_words() -> usize {
    5
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_base_ms() -> u64 {
    200
}
fn default_retry_backoff_max_ms() -> u64 {
    10_000
}
fn default_assignment_timeout_secs() -> u64 {
    60
}
fn default_max_redeliveries() -> u32 {
    3
}
fn default_task_timeout_secs() -> u64 {
    3600
}
fn default_sweep_interval_ms() -> u64 {
    500
}
fn default_capability() -> String {
    "coder".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_liveness_timeout_secs() -> u64 {
    90
}
fn default_max_concurrent() -> usize {
    5
}
fn default_max_store_attempts() -> u32 {
    3
}
fn default_learner_backoff_base_ms() -> u64 {
    50
}
fn default_log_filter() -> String {
    "prpflow=info".to_string()
}
fn default_true() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: default_subscriber_capacity(),
            max_delivery_attempts: default_max_delivery_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_factor: default_backoff_factor(),
            backoff_max_ms: default_backoff_max_ms(),
            dedup_capacity: default_dedup_capacity(),
        }
    }
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            embedding_dimension: default_embedding_dimension(),
            persist: true,
        }
    }
}

impl Default for PrpConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            retrieval_timeout_ms: default_retrieval_timeout_ms(),
            execution_timeout_secs: default_execution_timeout_secs(),
            min_goal_words: default_min_goal_words(),
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_base_ms: default_retry_backoff_base_ms(),
            retry_backoff_max_ms: default_retry_backoff_max_ms(),
            assignment_timeout_secs: default_assignment_timeout_secs(),
            max_redeliveries: default_max_redeliveries(),
            task_timeout_secs: default_task_timeout_secs(),
            sweep_interval_ms: default_sweep_interval_ms(),
            default_capability: default_capability(),
            pipeline: default_pipeline(),
        }
    }
}

impl Default for AgentsRuntimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            liveness_timeout_secs: default_liveness_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_store_attempts: default_max_store_attempts(),
            backoff_base_ms: default_learner_backoff_base_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn invalid(message: impl Into<String>) -> FlowError {
    FlowError::UserError(format!("config validation failed: {}", message.into()))
}

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(FlowError::UserError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string, then validate it.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| FlowError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            FlowError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    pub fn validate(&self) -> Result<()> {
        let t = &self.transport;
        if t.subscriber_capacity == 0 {
            return Err(invalid("transport.subscriber_capacity must be greater than 0"));
        }
        if t.max_delivery_attempts == 0 {
            return Err(invalid(
                "transport.max_delivery_attempts must be greater than 0",
            ));
        }
        if t.backoff_factor < 1.0 {
            return Err(invalid(format!(
                "transport.backoff_factor must be at least 1.0 (found {})",
                t.backoff_factor
            )));
        }
        if t.backoff_max_ms < t.backoff_base_ms {
            return Err(invalid(
                "transport.backoff_max_ms must not be less than transport.backoff_base_ms",
            ));
        }
        if t.dedup_capacity == 0 {
            return Err(invalid("transport.dedup_capacity must be greater than 0"));
        }

        if self.knowledge.embedding_dimension == 0 {
            return Err(invalid(
                "knowledge.embedding_dimension must be greater than 0",
            ));
        }

        if self.prp.top_k == 0 {
            return Err(invalid("prp.top_k must be greater than 0"));
        }
        if self.prp.retrieval_timeout_ms == 0 {
            return Err(invalid("prp.retrieval_timeout_ms must be greater than 0"));
        }
        if self.prp.execution_timeout_secs == 0 {
            return Err(invalid("prp.execution_timeout_secs must be greater than 0"));
        }

        let c = &self.coordinator;
        if c.max_attempts == 0 {
            return Err(invalid("coordinator.max_attempts must be greater than 0"));
        }
        if c.retry_backoff_max_ms < c.retry_backoff_base_ms {
            return Err(invalid(
                "coordinator.retry_backoff_max_ms must not be less than coordinator.retry_backoff_base_ms",
            ));
        }
        if c.assignment_timeout_secs == 0 || c.task_timeout_secs == 0 {
            return Err(invalid(
                "coordinator timeouts must be greater than 0",
            ));
        }
        if c.sweep_interval_ms == 0 {
            return Err(invalid("coordinator.sweep_interval_ms must be greater than 0"));
        }
        if c.default_capability.trim().is_empty() {
            return Err(invalid("coordinator.default_capability must be non-empty"));
        }
        self.validate_pipeline()?;

        if self.agents.heartbeat_interval_secs == 0 {
            return Err(invalid(
                "agents.heartbeat_interval_secs must be greater than 0",
            ));
        }
        if self.agents.liveness_timeout_secs < self.agents.heartbeat_interval_secs {
            return Err(invalid(
                "agents.liveness_timeout_secs must not be less than agents.heartbeat_interval_secs",
            ));
        }
        if self.agents.max_concurrent == 0 {
            return Err(invalid("agents.max_concurrent must be greater than 0"));
        }

        if self.learner.max_store_attempts == 0 {
            return Err(invalid("learner.max_store_attempts must be greater than 0"));
        }

        Ok(())
    }

    fn validate_pipeline(&self) -> Result<()> {
        let stages = &self.coordinator.pipeline;
        if stages.is_empty() {
            return Err(invalid("coordinator.pipeline must have at least one stage"));
        }

        let mut names = HashSet::new();
        for stage in stages {
            if stage.name.trim().is_empty() {
                return Err(invalid("pipeline stage names must be non-empty"));
            }
            if stage.capability.trim().is_empty() {
                return Err(invalid(format!(
                    "pipeline stage '{}' must name a capability",
                    stage.name
                )));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(invalid(format!(
                    "pipeline stage '{}' is declared twice",
                    stage.name
                )));
            }
        }

        for stage in stages {
            for dep in &stage.depends_on {
                if !names.contains(dep.as_str()) {
                    return Err(invalid(format!(
                        "pipeline stage '{}' depends on unknown stage '{}'",
                        stage.name, dep
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.prp.top_k, 5);
        assert_eq!(config.coordinator.max_attempts, 3);
        assert_eq!(config.agents.heartbeat_interval_secs, 30);
        assert_eq!(config.agents.max_concurrent, 5);
        assert_eq!(config.coordinator.pipeline.len(), 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.transport.max_delivery_attempts, 5);
        assert_eq!(config.knowledge.embedding_dimension, 256);
        assert_eq!(config.logging.filter, "prpflow=info");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
prp:
  top_k: 3
coordinator:
  max_attempts: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.prp.top_k, 3);
        assert_eq!(config.prp.retrieval_timeout_ms, 2000);
        assert_eq!(config.coordinator.max_attempts, 5);
        assert_eq!(config.coordinator.default_capability, "coder");
    }

    #[test]
    fn test_parse_custom_pipeline() {
        let yaml = r#"
coordinator:
  pipeline:
    - name: build
      capability: coder
      title: "Build {title}"
      acceptance_criteria: ["artifact:**/*.rs"]
    - name: check
      capability: tester
      title: "Check {title}"
      depends_on: [build]
      priority: high
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let stages = &config.coordinator.pipeline;
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[1].depends_on, vec!["build"]);
        assert_eq!(stages[1].priority, Some(Priority::High));
    }

    #[test]
    fn test_parse_yaml_with_unknown_fields() {
        let yaml = r#"
future_section:
  enabled: true
prp:
  top_k: 2
  some_new_knob: 7
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.prp.top_k, 2);
    }

    #[test]
    fn test_validate_zero_top_k() {
        let result = Config::from_yaml("prp:\n  top_k: 0\n");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("prp.top_k must be greater than 0"));
    }

    #[test]
    fn test_validate_backoff_factor_below_one() {
        let result = Config::from_yaml("transport:\n  backoff_factor: 0.5\n");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("backoff_factor must be at least 1.0")
        );
    }

    #[test]
    fn test_validate_backoff_max_below_base() {
        let yaml = "transport:\n  backoff_base_ms: 100\n  backoff_max_ms: 10\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_validate_pipeline_unknown_dependency() {
        let yaml = r#"
coordinator:
  pipeline:
    - name: build
      capability: coder
      title: "Build"
      depends_on: [plan]
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("unknown stage 'plan'"));
    }

    #[test]
    fn test_validate_pipeline_duplicate_stage() {
        let yaml = r#"
coordinator:
  pipeline:
    - { name: build, capability: coder, title: "A" }
    - { name: build, capability: tester, title: "B" }
"#;
        let err = Config::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_validate_liveness_shorter_than_heartbeat() {
        let yaml = "agents:\n  heartbeat_interval_secs: 30\n  liveness_timeout_secs: 10\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_to_yaml_round_trips_defaults() {
        let config = Config::default();
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.coordinator.pipeline, config.coordinator.pipeline);
        assert_eq!(parsed.prp.top_k, config.prp.top_k);
    }

    #[test]
    fn test_config_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "learner:\n  enabled: false").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert!(!config.learner.enabled);
    }

    #[test]
    fn test_config_load_missing_file() {
        let result = Config::load("/nonexistent/path/config.yaml");
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("failed to read config file")
        );
    }

    #[test]
    fn test_backoff_from_transport_config() {
        let config = TransportConfig::default();
        let backoff = config.backoff();
        assert_eq!(backoff.delay(0), Duration::from_millis(10));
        assert_eq!(backoff.delay(20), Duration::from_millis(1000));
    }
}
