//! Post-execution validation gates.
//!
//! Each validation criterion is parsed into a [`Criterion`]:
//!
//! - `artifact:<glob>`: at least one produced artifact matches the glob
//! - `metric:<name> <op> <number>`: a reported metric satisfies the comparison
//! - anything else: the agent must list the criterion in `satisfied_criteria`
//!   (compared case-insensitively, whitespace-trimmed)
//!
//! Error-severity findings fail the gate regardless of criteria.

use super::{AgentPrp, ExecutionResult, Severity};
use crate::error::{FlowError, Result};
use globset::{Glob, GlobMatcher};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static METRIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^metric:\s*([A-Za-z0-9_.\-]+)\s*(<=|>=|==|<|>)\s*(-?\d+(?:\.\d+)?)\s*$")
        .expect("Invalid metric criterion regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "==" => Some(Self::Eq),
            _ => None,
        }
    }

    fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Eq => (value - threshold).abs() < f64::EPSILON,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Eq => "==",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum Criterion {
    Artifact {
        pattern: String,
        matcher: GlobMatcher,
    },
    Metric {
        name: String,
        op: Comparison,
        threshold: f64,
    },
    Attested(String),
}

impl Criterion {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        if let Some(pattern) = text.strip_prefix("artifact:") {
            let pattern = pattern.trim().replace('\\', "/");
            let matcher = Glob::new(&pattern)
                .map_err(|e| {
                    FlowError::Validation(format!(
                        "invalid artifact glob in criterion '{}': {}",
                        text, e
                    ))
                })?
                .compile_matcher();
            return Ok(Criterion::Artifact { pattern, matcher });
        }

        if text.starts_with("metric:") {
            let caps = METRIC_REGEX.captures(text).ok_or_else(|| {
                FlowError::Validation(format!(
                    "invalid metric criterion '{}'\n\nFix: use `metric:<name> <op> <number>` with op one of <, <=, >, >=, ==.",
                    text
                ))
            })?;
            let op = Comparison::parse(&caps[2])
                .ok_or_else(|| FlowError::Validation(format!("unknown comparison in '{}'", text)))?;
            let threshold = caps[3].parse::<f64>().map_err(|e| {
                FlowError::Validation(format!("invalid threshold in '{}': {}", text, e))
            })?;
            return Ok(Criterion::Metric {
                name: caps[1].to_string(),
                op,
                threshold,
            });
        }

        Ok(Criterion::Attested(text.to_string()))
    }

    pub fn check(&self, result: &ExecutionResult) -> GateCheck {
        match self {
            Criterion::Artifact { pattern, matcher } => {
                let hit = result
                    .artifacts
                    .iter()
                    .find(|a| matcher.is_match(a.replace('\\', "/")));
                match hit {
                    Some(artifact) => GateCheck::pass(
                        format!("artifact:{}", pattern),
                        format!("matched {}", artifact),
                    ),
                    None => GateCheck::fail(
                        format!("artifact:{}", pattern),
                        "no produced artifact matches".to_string(),
                    ),
                }
            }
            Criterion::Metric {
                name,
                op,
                threshold,
            } => {
                let label = format!("metric:{} {} {}", name, op, threshold);
                match result.metrics.get(name) {
                    Some(&value) if op.holds(value, *threshold) => {
                        GateCheck::pass(label, format!("{} = {}", name, value))
                    }
                    Some(&value) => GateCheck::fail(label, format!("{} = {}", name, value)),
                    None => GateCheck::fail(label, format!("metric '{}' was not reported", name)),
                }
            }
            Criterion::Attested(text) => {
                let wanted = text.trim().to_lowercase();
                let attested = result
                    .satisfied_criteria
                    .iter()
                    .any(|c| c.trim().to_lowercase() == wanted);
                if attested {
                    GateCheck::pass(text.clone(), "attested by agent".to_string())
                } else {
                    GateCheck::fail(text.clone(), "not attested by agent".to_string())
                }
            }
        }
    }
}

/// One criterion's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct GateCheck {
    pub criterion: String,
    pub passed: bool,
    pub detail: String,
}

impl GateCheck {
    fn pass(criterion: String, detail: String) -> Self {
        Self {
            criterion,
            passed: true,
            detail,
        }
    }

    fn fail(criterion: String, detail: String) -> Self {
        Self {
            criterion,
            passed: false,
            detail,
        }
    }
}

/// Verdict of all gates for one execution.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub passed: bool,
    pub checks: Vec<GateCheck>,
}

impl GateOutcome {
    /// Evaluate every validation criterion of `prp` against `result`.
    ///
    /// A failed execution never passes.
    pub fn evaluate(prp: &AgentPrp, result: &ExecutionResult) -> Self {
        let mut checks = Vec::new();

        if !result.success {
            checks.push(GateCheck::fail(
                "execution".to_string(),
                result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "agent reported failure".to_string()),
            ));
        }

        for text in &prp.validation_criteria {
            let check = match Criterion::parse(text) {
                Ok(criterion) => criterion.check(result),
                Err(e) => GateCheck::fail(text.clone(), e.to_string()),
            };
            checks.push(check);
        }

        for finding in &result.findings {
            if finding.severity == Severity::Error {
                checks.push(GateCheck::fail(
                    "findings".to_string(),
                    finding.message.clone(),
                ));
            }
        }

        let passed = checks.iter().all(|c| c.passed);
        Self { passed, checks }
    }

    pub fn failures(&self) -> impl Iterator<Item = &GateCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// One-line summary of failed checks.
    pub fn reason(&self) -> String {
        self.failures()
            .map(|c| format!("{} ({})", c.criterion, c.detail))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// `GateFailure` carrying the reason when the gate did not pass.
    pub fn into_result(self) -> Result<()> {
        if self.passed {
            Ok(())
        } else {
            Err(FlowError::GateFailure(self.reason()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prp(criteria: &[&str]) -> AgentPrp {
        AgentPrp {
            validation_criteria: criteria.iter().map(|s| s.to_string()).collect(),
            ..AgentPrp::default()
        }
    }

    #[test]
    fn test_artifact_criterion() {
        let result = ExecutionResult::success("t", "a").with_artifact("src\\limiter\\mod.rs");
        let outcome = GateOutcome::evaluate(&prp(&["artifact:src/**/*.rs"]), &result);
        assert!(outcome.passed);

        let outcome = GateOutcome::evaluate(&prp(&["artifact:docs/*.md"]), &result);
        assert!(!outcome.passed);
        assert!(outcome.reason().contains("no produced artifact matches"));
    }

    #[test]
    fn test_metric_criterion() {
        let result = ExecutionResult::success("t", "a").with_metric("coverage", 0.82);
        assert!(GateOutcome::evaluate(&prp(&["metric:coverage >= 0.8"]), &result).passed);
        assert!(!GateOutcome::evaluate(&prp(&["metric:coverage > 0.9"]), &result).passed);

        let missing = GateOutcome::evaluate(&prp(&["metric:latency_ms < 5"]), &result);
        assert!(missing.reason().contains("was not reported"));
    }

    #[test]
    fn test_malformed_metric_fails_the_gate() {
        let result = ExecutionResult::success("t", "a");
        let outcome = GateOutcome::evaluate(&prp(&["metric:coverage is high"]), &result);
        assert!(!outcome.passed);
        assert!(outcome.reason().contains("invalid metric criterion"));
    }

    #[test]
    fn test_attested_criterion_is_case_insensitive() {
        let result = ExecutionResult::success("t", "a").with_criterion("  Unit Tests Pass ");
        assert!(GateOutcome::evaluate(&prp(&["unit tests pass"]), &result).passed);
        assert!(!GateOutcome::evaluate(&prp(&["docs updated"]), &result).passed);
    }

    #[test]
    fn test_error_findings_fail_the_gate() {
        let result = ExecutionResult::success("t", "a")
            .with_criterion("done")
            .with_finding(Severity::Warning, "slow")
            .with_finding(Severity::Error, "unsafe block added");
        let outcome = GateOutcome::evaluate(&prp(&["done"]), &result);
        assert!(!outcome.passed);
        assert_eq!(outcome.failures().count(), 1);
    }

    #[test]
    fn test_failed_execution_never_passes() {
        let result = ExecutionResult::failure("t", "a", &FlowError::ExecutionFailure("exit 1".into()));
        let outcome = GateOutcome::evaluate(&prp(&[]), &result);
        assert!(!outcome.passed);
        assert!(matches!(
            outcome.into_result(),
            Err(FlowError::GateFailure(_))
        ));
    }
}
