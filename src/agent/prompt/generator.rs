//! Render a PRP prompt and write it where the agent command can read it.

use super::{PromptContext, render_template};
use crate::error::Result;
use crate::fs::atomic_write_file;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct GeneratedPrompt {
    pub content: String,
    pub path: PathBuf,
}

pub fn generate_prompt(context: &PromptContext, template: &str, template_name: &str) -> Result<String> {
    render_template(template, &context.to_template_vars())
        .map_err(|e| e.in_template(&format!("prompt template '{}'", template_name)))
}

/// `{prompts_dir}/{feature}/{task}-attempt-{n}.md`
pub fn prompt_path(prompts_dir: &Path, context: &PromptContext) -> PathBuf {
    prompts_dir
        .join(sanitize(&context.feature_id))
        .join(format!("{}-attempt-{}.md", sanitize(&context.task_id), context.attempt))
}

pub fn generate_and_write_prompt(
    prompts_dir: &Path,
    context: &PromptContext,
    template: &str,
    template_name: &str,
) -> Result<GeneratedPrompt> {
    let content = generate_prompt(context, template, template_name)?;
    let path = prompt_path(prompts_dir, context);
    atomic_write_file(&path, &content)?;
    Ok(GeneratedPrompt { content, path })
}

/// Keep ids usable as file names.
pub(crate) fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
