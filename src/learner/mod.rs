//! Outcome learning: every execution report becomes a success or failure
//! pattern in the knowledge store, where later enrichment finds it.

mod extract;
mod outcome;

pub use extract::{DefaultPatternExtractor, PatternDraft, PatternExtractor};
pub use outcome::OutcomeLearner;
