//! Text-keyed retrieval over the knowledge store.

use super::{Embedder, KnowledgeFilter, KnowledgeStore, ScoredEntry};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Search by text. Enrichment talks to this seam, not to the store directly.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(
        &self,
        text: &str,
        k: usize,
        filter: Option<&KnowledgeFilter>,
    ) -> Result<Vec<ScoredEntry>>;
}

/// Embeds the query text, then searches the store.
pub struct StoreRetriever {
    store: Arc<KnowledgeStore>,
    embedder: Arc<dyn Embedder>,
}

impl StoreRetriever {
    pub fn new(store: Arc<KnowledgeStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }
}

#[async_trait]
impl Retriever for StoreRetriever {
    async fn retrieve(
        &self,
        text: &str,
        k: usize,
        filter: Option<&KnowledgeFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        let embedding = self.embedder.embed(text).await?;
        self.store.query(&embedding, k, filter)
    }
}
