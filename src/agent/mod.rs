//! Agent runtime: the capability interface, its concrete runtimes and the
//! worker loop that drives them.
//!
//! - **Runtime**: [`AgentRuntime`] (`capability`, `accept`, `execute`)
//! - **Config**: agent profiles (`agents.yaml`)
//! - **Binding**: capability to runtime resolution
//! - **Dispatch**: [`CommandAgent`], a subprocess-backed runtime
//! - **Prompt**: prompt rendering from a PRP
//! - **Worker**: [`AgentWorker`], claim-execute-report loop
//!
//! Runtimes are selected by capability tag at dispatch time; there is no
//! per-kind type hierarchy.

mod binding;
mod config;
pub mod dispatch;
pub mod prompt;
mod runtime;
mod worker;

pub use binding::{AgentBinding, BindingSource, resolve_bindings};
pub use config::{AgentDefaults, AgentProfile, AgentsConfig, default_prompt_template_content};
pub use dispatch::CommandAgent;
pub use runtime::{AgentRuntime, DryRunAgent, ExecutionContext};
pub use worker::AgentWorker;
