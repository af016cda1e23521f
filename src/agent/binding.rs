//! Capability-to-runtime binding.
//!
//! A feature needs one runtime per capability its tasks name. Each
//! capability resolves to the `agents.yaml` profile that serves it, or to a
//! [`DryRunAgent`] in dry-run mode. Instances per capability are capped by
//! `agents.max_concurrent`.

use crate::agent::config::AgentsConfig;
use crate::agent::dispatch::CommandAgent;
use crate::agent::{AgentRuntime, DryRunAgent};
use crate::context::FlowContext;
use crate::error::{FlowError, Result};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A runtime and how many workers should drive it.
#[derive(Clone)]
pub struct AgentBinding {
    /// Profile name, or `dry-run`.
    pub profile: String,
    pub capability: String,
    pub instances: usize,
    pub runtime: Arc<dyn AgentRuntime>,
    pub source: BindingSource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    Profile,
    DryRun,
}

/// Bind every capability in `required` to a runtime.
///
/// With several profiles serving one capability the first by name wins.
pub fn resolve_bindings(
    required: &BTreeSet<String>,
    agents: &AgentsConfig,
    flow: &FlowContext,
    max_concurrent: usize,
    dry_run: bool,
) -> Result<Vec<AgentBinding>> {
    let mut bindings = Vec::with_capacity(required.len());
    let mut missing = Vec::new();

    for capability in required {
        if dry_run {
            bindings.push(AgentBinding {
                profile: "dry-run".to_string(),
                capability: capability.clone(),
                instances: 1,
                runtime: Arc::new(DryRunAgent::new(capability.clone())),
                source: BindingSource::DryRun,
            });
            continue;
        }

        match agents
            .iter()
            .find(|(name, profile)| profile.capability(name) == capability)
        {
            Some((name, profile)) => {
                let runtime = CommandAgent::new(name, profile, agents, flow)?;
                bindings.push(AgentBinding {
                    profile: name.to_string(),
                    capability: capability.clone(),
                    instances: profile
                        .effective_instances(&agents.defaults)
                        .min(max_concurrent)
                        .max(1),
                    runtime: Arc::new(runtime),
                    source: BindingSource::Profile,
                });
            }
            None => missing.push(capability.as_str()),
        }
    }

    if !missing.is_empty() {
        return Err(FlowError::UserError(format!(
            "no agent profile serves capability {}.\n\
             Configured profiles: {}\n\n\
             Fix: add a profile to .prpflow/agents.yaml, for example:\n\
             agents:\n  \
               {}:\n    \
                 command: \"claude -p {{prompt_file}}\"\n\n\
             or run with --dry-run.",
            missing
                .iter()
                .map(|c| format!("'{}'", c))
                .collect::<Vec<_>>()
                .join(", "),
            available_profiles(agents),
            missing[0]
        )));
    }

    Ok(bindings)
}

fn available_profiles(agents: &AgentsConfig) -> String {
    let names: Vec<String> = agents
        .iter()
        .map(|(name, p)| format!("{} ({})", name, p.capability(name)))
        .collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
