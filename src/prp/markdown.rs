//! Markdown PRP documents.
//!
//! Recognized `##` sections (case-insensitive): `Goal`, `Why`, `What`,
//! `All Needed Context`, `Implementation Blueprint`, `Validation Loop`,
//! `Anti-Patterns`. Deeper headings stay inside their parent section.

use super::AgentPrp;
use super::processor::DEFAULT_FAILURE_RECOVERY;
use crate::error::{FlowError, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;

static STEP_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+\.|[-*+]\s|task\s|step\s)").expect("Invalid step regex")
});
static STEP_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d+\.\s*|[-*+]\s*)?((task|step)\s*\d*:?\s*)?").expect("Invalid step prefix regex")
});
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s)>\]]+").expect("Invalid URL regex"));
static FILE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"file:\s*(\S+)").expect("Invalid file reference regex"));
static GOTCHA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)gotchas?:\s*([^\n]+)").expect("Invalid gotcha regex"));
static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)patterns?:\s*([^\n]+)").expect("Invalid pattern regex"));

const COMMAND_PREFIXES: &[&str] = &[
    "cargo", "uv run", "pytest", "ruff", "mypy", "curl", "docker", "npm", "make",
];
const SUCCESS_KEYWORDS: &[&str] = &["success", "complete", "pass", "achieve", "deliver"];
const CHECKLIST_MARKERS: &[&str] = &["✓", "✅", "[ ]", "-", "*"];
const VAGUE_WORDS: &[&str] = &["somehow", "maybe", "possibly", "perhaps"];

/// Read and parse a Markdown PRP file.
pub fn load_markdown_prp<P: AsRef<Path>>(path: P) -> Result<AgentPrp> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        FlowError::UserError(format!(
            "failed to read PRP file '{}': {}",
            path.display(),
            e
        ))
    })?;
    let mut prp = parse_markdown_prp(&content);
    if prp.task_id.is_empty() {
        prp.task_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    Ok(prp)
}

/// Parse Markdown PRP text. Missing sections produce empty fields;
/// use [`validate_prp`] to enforce completeness.
pub fn parse_markdown_prp(content: &str) -> AgentPrp {
    let sections = extract_sections(content);
    let section = |name: &str| sections.get(name).map(String::as_str).unwrap_or("");

    let anti_patterns = parse_anti_patterns(section("anti-patterns"));
    let failure_recovery = if anti_patterns.is_empty() {
        DEFAULT_FAILURE_RECOVERY.iter().map(|s| s.to_string()).collect()
    } else {
        anti_patterns
    };

    AgentPrp {
        task_id: String::new(),
        goal: section("goal").to_string(),
        justification: section("why").to_string(),
        context: Vec::new(),
        references: parse_references(section("all_needed_context")),
        implementation_steps: parse_steps(section("implementation_blueprint")),
        validation_criteria: parse_criteria(section("validation_loop")),
        success_metrics: parse_success_metrics(section("what")),
        failure_recovery,
        enrichment_notes: Vec::new(),
    }
}

/// Completeness report for a PRP document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrpReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
    /// 0.0 to 1.0, rewards detailed goals, steps and criteria.
    pub quality_score: f64,
    /// Weighted share of required (70%) and optional (30%) fields present.
    pub completeness: f64,
}

/// Check a PRP for the fields an agent needs before it can run.
pub fn validate_prp(prp: &AgentPrp, min_goal_words: usize) -> PrpReport {
    let mut errors = Vec::new();

    if prp.goal.trim().is_empty() {
        errors.push("Goal is required".to_string());
    } else if prp.goal.split_whitespace().count() < min_goal_words {
        errors.push(format!(
            "Goal should be more descriptive (at least {} words)",
            min_goal_words
        ));
    }
    if prp.justification.trim().is_empty() {
        errors.push("Justification is required".to_string());
    }
    if prp.implementation_steps.is_empty() {
        errors.push("Implementation steps are required".to_string());
    }
    if prp.validation_criteria.is_empty() {
        errors.push("Validation criteria are required".to_string());
    }

    for (i, step) in prp.implementation_steps.iter().enumerate() {
        if step.trim().is_empty() {
            errors.push(format!("Implementation step {} is empty", i + 1));
        } else if VAGUE_WORDS
            .iter()
            .any(|w| step.to_lowercase().split_whitespace().any(|t| t == *w))
        {
            errors.push(format!("Implementation step {} is too vague: {}", i + 1, step));
        }
    }
    for (i, criterion) in prp.validation_criteria.iter().enumerate() {
        if criterion.trim().is_empty() {
            errors.push(format!("Validation criterion {} is empty", i + 1));
        }
    }

    PrpReport {
        is_valid: errors.is_empty(),
        errors,
        quality_score: quality_score(prp),
        completeness: completeness(prp),
    }
}

fn quality_score(prp: &AgentPrp) -> f64 {
    let mut score: f64 = 0.0;
    if prp.goal.len() > 10 {
        score += 0.2;
    }
    if prp.justification.len() > 50 {
        score += 0.2;
    }
    let steps = &prp.implementation_steps;
    if steps.len() >= 3 {
        score += 0.1;
    }
    if steps.iter().any(|s| s.len() > 50) {
        score += 0.1;
    }
    if steps.len() >= 5 {
        score += 0.1;
    }
    if prp.validation_criteria.len() >= 2 {
        score += 0.1;
    }
    if prp.validation_criteria.len() >= 4 {
        score += 0.1;
    }
    if !prp.references.is_empty() || !prp.context.is_empty() {
        score += 0.1;
    }
    score.min(1.0)
}

fn completeness(prp: &AgentPrp) -> f64 {
    let required = [
        !prp.goal.trim().is_empty(),
        !prp.justification.trim().is_empty(),
        !prp.implementation_steps.is_empty(),
        !prp.validation_criteria.is_empty(),
    ];
    let optional = [
        !prp.success_metrics.is_empty(),
        !prp.failure_recovery.is_empty(),
        !prp.references.is_empty() || !prp.context.is_empty(),
    ];
    let share = |flags: &[bool]| flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64;
    share(&required) * 0.7 + share(&optional) * 0.3
}

/// Split the document into `##` sections keyed by normalized heading.
fn extract_sections(body: &str) -> HashMap<String, String> {
    let mut sections = HashMap::new();
    let mut current_section: Option<String> = None;
    let mut current_content = String::new();

    for line in body.lines() {
        if let Some(heading) = parse_heading(line) {
            if let Some(name) = current_section.take() {
                sections.insert(name, current_content.trim().to_string());
            }
            current_section = Some(heading);
            current_content = String::new();
        } else if current_section.is_some() {
            current_content.push_str(line);
            current_content.push('\n');
        }
    }

    if let Some(name) = current_section {
        sections.insert(name, current_content.trim().to_string());
    }

    sections
}

/// Level-two heading to section key: lowercase, spaces become underscores.
fn parse_heading(line: &str) -> Option<String> {
    let rest = line.trim().strip_prefix("##")?;
    if rest.starts_with('#') {
        return None;
    }
    let content = rest.trim();
    if content.is_empty() {
        return None;
    }
    Some(content.to_lowercase().replace(' ', "_"))
}

fn parse_steps(text: &str) -> Vec<String> {
    let mut steps = Vec::new();
    let mut current = String::new();

    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("```") {
            continue;
        }
        if STEP_START.is_match(line) {
            if !current.trim().is_empty() {
                steps.push(current.trim().to_string());
            }
            current = STEP_PREFIX.replace(line, "").to_string();
        } else if !current.is_empty() {
            current.push(' ');
            current.push_str(line);
        }
    }
    if !current.trim().is_empty() {
        steps.push(current.trim().to_string());
    }
    steps
}

fn parse_criteria(text: &str) -> Vec<String> {
    let mut criteria = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("```") {
            continue;
        }
        let lower = line.to_lowercase();
        if COMMAND_PREFIXES.iter().any(|p| line.starts_with(p)) {
            criteria.push(line.to_string());
        } else if line.starts_with("# ")
            || line.starts_with("- ")
            || lower.contains("test")
            || lower.contains("validation")
        {
            let cleaned = line.trim_start_matches(['#', '-', ' ']).trim();
            if !cleaned.is_empty() {
                criteria.push(cleaned.to_string());
            }
        }
    }
    criteria
}

fn parse_references(text: &str) -> BTreeMap<String, Vec<String>> {
    let mut references = BTreeMap::new();
    if text.trim().is_empty() {
        return references;
    }

    let mut add = |key: &str, values: Vec<String>| {
        if !values.is_empty() {
            references.insert(key.to_string(), values);
        }
    };
    add(
        "documentation_urls",
        URL.find_iter(text).map(|m| m.as_str().to_string()).collect(),
    );
    add(
        "file_references",
        FILE_REF.captures_iter(text).map(|c| c[1].to_string()).collect(),
    );
    add(
        "gotchas",
        GOTCHA.captures_iter(text).map(|c| c[1].trim().to_string()).collect(),
    );
    add(
        "patterns",
        PATTERN.captures_iter(text).map(|c| c[1].trim().to_string()).collect(),
    );
    add("full_context", vec![text.trim().to_string()]);
    references
}

fn parse_success_metrics(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| {
            let lower = line.to_lowercase();
            SUCCESS_KEYWORDS.iter().any(|k| lower.contains(k))
                && CHECKLIST_MARKERS.iter().any(|m| line.contains(m))
        })
        .map(|line| {
            line.trim_start_matches(['-', '*', '+', '✓', '✅', ' '])
                .trim_start_matches("[ ]")
                .trim_start_matches("[x]")
                .trim()
                .to_string()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

fn parse_anti_patterns(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter_map(|line| {
            line.strip_prefix("- ❌")
                .or_else(|| line.strip_prefix("❌"))
                .map(|rest| format!("Avoid: {}", rest.trim()))
        })
        .collect()
}
