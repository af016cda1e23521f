//! Knowledge store: immutable embedded text entries with similarity search.
//!
//! The store never computes embeddings itself. Text is turned into vectors
//! by an [`Embedder`]; [`StoreRetriever`] combines both for callers that
//! search by text.

mod embed;
mod entry;
mod journal;
mod retriever;
mod store;
#[cfg(test)]
mod tests;

pub use embed::{Embedder, HashingEmbedder};
pub use entry::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry, SourceType};
pub use retriever::{Retriever, StoreRetriever};
pub use store::KnowledgeStore;

/// Metadata key naming the entry a newer entry replaces.
pub const SUPERSEDES_KEY: &str = "supersedes";
