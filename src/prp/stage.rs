use crate::error::{FlowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrpStage {
    Received,
    Validated,
    ContextEnriched,
    Executing,
    PostValidated,
    Completed,
    Rejected,
    Failed,
}

impl PrpStage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PrpStage::Completed | PrpStage::Rejected | PrpStage::Failed
        )
    }

    /// Whether `self -> next` is a legal transition. Any stage after
    /// validation may fail (cancellation, gate rejection).
    pub fn can_advance(&self, next: PrpStage) -> bool {
        use PrpStage::*;
        matches!(
            (self, next),
            (Received, Validated)
                | (Received, Rejected)
                | (Validated, ContextEnriched)
                | (ContextEnriched, Executing)
                | (Executing, PostValidated)
                | (PostValidated, Completed)
                | (Validated, Failed)
                | (ContextEnriched, Failed)
                | (Executing, Failed)
                | (PostValidated, Failed)
        )
    }
}

impl fmt::Display for PrpStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrpStage::Received => "received",
            PrpStage::Validated => "validated",
            PrpStage::ContextEnriched => "context_enriched",
            PrpStage::Executing => "executing",
            PrpStage::PostValidated => "post_validated",
            PrpStage::Completed => "completed",
            PrpStage::Rejected => "rejected",
            PrpStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Stage history of one execution attempt.
#[derive(Debug, Clone, Serialize)]
pub struct PrpRun {
    pub task_id: String,
    pub correlation_id: String,
    stage: PrpStage,
    history: Vec<(PrpStage, DateTime<Utc>)>,
}

impl PrpRun {
    pub fn new(task_id: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            correlation_id: correlation_id.into(),
            stage: PrpStage::Received,
            history: vec![(PrpStage::Received, Utc::now())],
        }
    }

    pub fn stage(&self) -> PrpStage {
        self.stage
    }

    pub fn history(&self) -> impl Iterator<Item = PrpStage> + '_ {
        self.history.iter().map(|(stage, _)| *stage)
    }

    pub fn advance(&mut self, next: PrpStage) -> Result<()> {
        if !self.stage.can_advance(next) {
            return Err(FlowError::Validation(format!(
                "illegal PRP transition for task '{}': {} -> {}",
                self.task_id, self.stage, next
            )));
        }
        self.stage = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut run = PrpRun::new("t1", "c1");
        for stage in [
            PrpStage::Validated,
            PrpStage::ContextEnriched,
            PrpStage::Executing,
            PrpStage::PostValidated,
            PrpStage::Completed,
        ] {
            run.advance(stage).unwrap();
        }
        assert!(run.stage().is_terminal());
        assert_eq!(run.history().count(), 6);
    }

    #[test]
    fn test_rejection_only_from_received() {
        let mut run = PrpRun::new("t1", "c1");
        run.advance(PrpStage::Validated).unwrap();
        let err = run.advance(PrpStage::Rejected).unwrap_err();
        assert!(err.to_string().contains("validated -> rejected"));
    }

    #[test]
    fn test_terminal_stages_do_not_advance() {
        let mut run = PrpRun::new("t1", "c1");
        run.advance(PrpStage::Rejected).unwrap();
        assert!(run.advance(PrpStage::Validated).is_err());
        assert!(!PrpStage::Completed.can_advance(PrpStage::Failed));
    }

    #[test]
    fn test_cannot_skip_enrichment() {
        let mut run = PrpRun::new("t1", "c1");
        run.advance(PrpStage::Validated).unwrap();
        assert!(run.advance(PrpStage::Executing).is_err());
    }
}
