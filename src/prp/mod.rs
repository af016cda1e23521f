//! PRP processing: validate a task, enrich it with retrieved knowledge,
//! drive its execution and check the result against validation gates.
//!
//! # Stages
//!
//! ```text
//! Received -> Validated -> ContextEnriched -> Executing -> PostValidated -> Completed
//! Received -> Rejected
//! Executing -> Failed
//! ```
//!
//! Each attempt at a task is a fresh [`PrpRun`]; retries never resume an
//! earlier run.

mod gates;
mod markdown;
mod model;
mod processor;
mod stage;

pub use gates::{Comparison, Criterion, GateCheck, GateOutcome};
pub use markdown::{PrpReport, load_markdown_prp, parse_markdown_prp, validate_prp};
pub use model::{
    AgentPrp, ContextSnippet, ExecutionResult, Finding, Severity, TaskError, ValidationResult,
};
pub use processor::{DEFAULT_FAILURE_RECOVERY, PrpProcessor, ProcessOutcome};
pub use stage::{PrpRun, PrpStage};
