//! Prompt rendering for command-driven agents.
//!
//! A prompt is a template with `{variable}` placeholders filled from the
//! PRP (`{goal}`, `{implementation_steps}`, `{validation_criteria}`, ...).
//! Use `{{` to render a literal `{`.

mod context;
mod generator;
mod template;

pub use context::PromptContext;
pub use generator::{GeneratedPrompt, generate_and_write_prompt, generate_prompt, prompt_path};
pub(crate) use generator::sanitize;
pub use template::{TemplateError, render_template, vars};
