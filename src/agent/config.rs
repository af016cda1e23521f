//! Agent profiles loaded from `.prpflow/agents.yaml`.
//!
//! ```yaml
//! agents:
//!   coder:
//!     capability: coder
//!     command: "claude -p {prompt_file}"
//!     instances: 2
//!     timeout_seconds: 900
//!     environment:
//!       CLAUDE_CODE_AUTO_CONFIRM: "true"
//!   tester:
//!     capability: tester
//!     command: "./scripts/run-tests.sh {task_id} {prompt_file}"
//!     prompt_template: terse
//!
//! defaults:
//!   timeout_seconds: 600
//!   instances: 1
//!
//! prompt_templates:
//!   terse: |
//!     {goal}
//!     {validation_criteria}
//! ```
//!
//! Command placeholders: `{task_id}`, `{feature_id}`, `{agent_id}`,
//! `{capability}`, `{attempt}`, `{prompt_file}`, `{project_root}`, `{title}`.

use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const DEFAULT_TIMEOUT_SECONDS: u64 = 600;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Profiles keyed by name.
    pub agents: BTreeMap<String, AgentProfile>,
    pub defaults: AgentDefaults,
    /// Prompt templates keyed by name; `default` is built in.
    pub prompt_templates: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentDefaults {
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_instances")]
    pub instances: usize,

    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            instances: default_instances(),
            prompt_template: default_prompt_template(),
        }
    }
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_instances() -> usize {
    1
}

fn default_prompt_template() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Task capability this profile serves; defaults to the profile name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,

    /// Command template, split with shell-words after rendering.
    pub command: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instances: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template: Option<String>,
}

impl AgentProfile {
    pub fn capability<'a>(&'a self, name: &'a str) -> &'a str {
        self.capability.as_deref().unwrap_or(name)
    }

    pub fn effective_timeout(&self, defaults: &AgentDefaults) -> u64 {
        self.timeout_seconds.unwrap_or(defaults.timeout_seconds)
    }

    pub fn effective_instances(&self, defaults: &AgentDefaults) -> usize {
        self.instances.unwrap_or(defaults.instances)
    }

    pub fn effective_prompt_template<'a>(&'a self, defaults: &'a AgentDefaults) -> &'a str {
        self.prompt_template
            .as_deref()
            .unwrap_or(&defaults.prompt_template)
    }
}

impl AgentsConfig {
    /// `Ok(None)` when the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            FlowError::UserError(format!(
                "failed to read agents config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content).map(Some)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: AgentsConfig = serde_yaml::from_str(yaml)
            .map_err(|e| FlowError::UserError(format!("failed to parse agents.yaml: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| FlowError::UserError(format!("failed to serialize agents config: {}", e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.defaults.timeout_seconds == 0 {
            return Err(invalid("defaults.timeout_seconds must be greater than 0"));
        }
        if self.defaults.instances == 0 {
            return Err(invalid("defaults.instances must be greater than 0"));
        }

        for (name, profile) in &self.agents {
            if name.trim().is_empty() {
                return Err(invalid("agent name cannot be empty"));
            }
            if profile.command.trim().is_empty() {
                return Err(invalid(&format!("agent '{}' has empty command", name)));
            }
            if profile.capability(name).trim().is_empty() {
                return Err(invalid(&format!("agent '{}' has empty capability", name)));
            }
            if profile.timeout_seconds == Some(0) {
                return Err(invalid(&format!(
                    "agent '{}' has timeout_seconds of 0",
                    name
                )));
            }
            if profile.instances == Some(0) {
                return Err(invalid(&format!("agent '{}' has instances of 0", name)));
            }
            let template = profile.effective_prompt_template(&self.defaults);
            if self.prompt_template(template).is_none() {
                return Err(invalid(&format!(
                    "agent '{}' references unknown prompt_template '{}'",
                    name, template
                )));
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&AgentProfile> {
        self.agents.get(name)
    }

    /// Named template, with `default` falling back to the built-in one.
    pub fn prompt_template(&self, name: &str) -> Option<&str> {
        match self.prompt_templates.get(name) {
            Some(template) => Some(template.as_str()),
            None if name == "default" => Some(default_prompt_template_content()),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentProfile)> {
        self.agents.iter().map(|(name, p)| (name.as_str(), p))
    }
}

fn invalid(msg: &str) -> FlowError {
    FlowError::UserError(format!("agents.yaml validation failed: {}", msg))
}

/// Built-in prompt template.
pub fn default_prompt_template_content() -> &'static str {
    r#"# Task {task_id}: {goal}

## Why
{justification}

## Implementation Steps
{implementation_steps}

## Validation Criteria
{validation_criteria}

## Success Metrics
{success_metrics}

## Relevant Knowledge
{context}

## If Something Fails
{failure_recovery}

## Reporting
Print one line per fact on stdout when done:
ARTIFACT: <path>
CRITERION: <validation criterion that now holds>
METRIC: <name>=<number>
FINDING: <info|warning|error> <text>
APPROACH: <one-line summary of what you did>
"#
}
