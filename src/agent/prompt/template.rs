//! `{name}` substitution for prompts, commands and pipeline stage titles.
//!
//! `{{` and `}}` render literal braces. Whitespace inside a placeholder is
//! ignored. Referencing a variable that was not supplied is an error.

use crate::error::FlowError;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("undefined variable '{name}' at position {position} in template")]
    UndefinedVariable { name: String, position: usize },

    #[error("unmatched '{{' at position {position} in template")]
    UnmatchedBrace { position: usize },

    #[error("empty variable name '{{}}' at position {position} in template")]
    EmptyVariableName { position: usize },
}

impl TemplateError {
    /// Attach the template's origin so the user can find it.
    pub fn in_template(self, origin: &str) -> FlowError {
        FlowError::UserError(format!("{} ({})", self, origin))
    }
}

/// Substitute every `{name}` in `template` from `variables`.
pub fn render_template(
    template: &str,
    variables: &HashMap<String, String>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(idx) = rest.find(['{', '}']) {
        out.push_str(&rest[..idx]);
        let position = offset + idx;
        let tail = &rest[idx..];

        let consumed = if tail.starts_with("{{") {
            out.push('{');
            2
        } else if tail.starts_with("}}") {
            out.push('}');
            2
        } else if tail.starts_with('}') {
            out.push('}');
            1
        } else {
            let close = tail
                .find('}')
                .ok_or(TemplateError::UnmatchedBrace { position })?;
            let raw = &tail[1..close];
            if raw.is_empty() {
                return Err(TemplateError::EmptyVariableName { position });
            }
            let name = raw.trim();
            let value = variables
                .get(name)
                .ok_or_else(|| TemplateError::UndefinedVariable {
                    name: name.to_string(),
                    position,
                })?;
            out.push_str(value);
            close + 1
        };

        rest = &tail[consumed..];
        offset = position + consumed;
    }
    out.push_str(rest);

    Ok(out)
}

/// Build a variables map from pairs.
pub fn vars<I, K, V>(pairs: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
