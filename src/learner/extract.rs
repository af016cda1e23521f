//! Turning execution reports into knowledge entries.

use crate::error::FailureKind;
use crate::knowledge::SourceType;
use crate::prp::Severity;
use crate::transport::TaskReport;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// A pattern ready to be embedded and stored.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternDraft {
    pub content: String,
    pub source_type: SourceType,
    pub tags: BTreeSet<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl PatternDraft {
    /// Stable key shared by drafts describing the same kind of work.
    pub fn signature(&self) -> Option<&str> {
        self.metadata.get("signature").and_then(Value::as_str)
    }
}

/// Strategy for what (if anything) to learn from one report.
pub trait PatternExtractor: Send + Sync {
    fn extract(&self, report: &TaskReport) -> Option<PatternDraft>;
}

/// Records the approach of every success and the error of every failure.
///
/// Cancelled executions teach nothing and are skipped.
#[derive(Debug, Default, Clone)]
pub struct DefaultPatternExtractor;

impl PatternExtractor for DefaultPatternExtractor {
    fn extract(&self, report: &TaskReport) -> Option<PatternDraft> {
        let result = &report.result;
        let task = &report.task;

        let mut metadata = BTreeMap::new();
        metadata.insert("feature_id".to_string(), json!(report.feature_id));
        metadata.insert("task_id".to_string(), json!(task.id));
        metadata.insert("capability".to_string(), json!(report.capability));
        metadata.insert("agent_id".to_string(), json!(report.agent_id));
        metadata.insert("attempt".to_string(), json!(report.attempt));
        metadata.insert("duration_ms".to_string(), json!(result.duration_ms));

        let mut tags = BTreeSet::from([report.capability.clone()]);
        let mut lines = Vec::new();

        let (source_type, outcome) = if result.success {
            tags.insert("success".to_string());
            tags.insert("pattern".to_string());
            lines.push(format!(
                "Task '{}' ({}) succeeded on attempt {}.",
                task.title, report.capability, report.attempt
            ));
            lines.push(format!(
                "Approach: {}",
                result.approach.as_deref().unwrap_or("not reported")
            ));
            if !result.artifacts.is_empty() {
                lines.push(format!("Artifacts: {}", result.artifacts.join(", ")));
            }
            if !result.metrics.is_empty() {
                let metrics: Vec<String> = result
                    .metrics
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect();
                lines.push(format!("Metrics: {}", metrics.join(", ")));
                metadata.insert("metrics".to_string(), json!(result.metrics));
            }
            (SourceType::SuccessPattern, SourceType::SuccessPattern.to_string())
        } else {
            let error = result.error.as_ref()?;
            if error.kind == FailureKind::Cancelled {
                return None;
            }
            tags.insert("failure".to_string());
            tags.insert(error.kind.as_str().to_string());
            lines.push(format!(
                "Task '{}' failed ({}): {}",
                task.title,
                error.kind,
                first_line(&error.message)
            ));
            if let Some(approach) = &result.approach {
                lines.push(format!("Attempted approach: {}", approach));
            }
            for finding in result.findings.iter().filter(|f| f.severity != Severity::Info) {
                lines.push(format!("Finding ({}): {}", finding.severity, finding.message));
            }
            metadata.insert("failure_kind".to_string(), json!(error.kind));
            let outcome = format!(
                "{} {} {}",
                SourceType::FailurePattern,
                error.kind,
                first_line(&error.message)
            );
            (SourceType::FailurePattern, outcome)
        };

        metadata.insert(
            "signature".to_string(),
            json!(signature(&report.capability, &task.title, &outcome)),
        );

        Some(PatternDraft {
            content: lines.join("\n"),
            source_type,
            tags,
            metadata,
        })
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("").trim()
}

fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// 16 hex chars over capability, normalized title and normalized outcome.
///
/// A failure's outcome carries its kind and first error line, so different
/// causes of the same task's failures keep separate patterns.
fn signature(capability: &str, title: &str, outcome: &str) -> String {
    let digest = Sha256::digest(
        format!("{}|{}|{}", capability, normalize(title), normalize(outcome)).as_bytes(),
    );
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}
