//! In-memory vector store with an optional append-only journal.
//!
//! Entries are shared as `Arc<KnowledgeEntry>` and never modified after
//! insertion; readers hold the read lock only while scoring.

use super::journal::{Journal, JournalRecord};
use super::{KnowledgeEntry, KnowledgeFilter, KnowledgeStats, ScoredEntry};
use crate::error::{FlowError, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct Entries {
    /// Insertion order; `None` marks a deleted slot.
    slots: Vec<Option<Arc<KnowledgeEntry>>>,
    by_id: HashMap<String, usize>,
    superseded: HashSet<String>,
}

impl Entries {
    fn insert(&mut self, entry: KnowledgeEntry) {
        if let Some(old) = entry.supersedes() {
            self.superseded.insert(old.to_string());
        }
        self.by_id.insert(entry.id.clone(), self.slots.len());
        self.slots.push(Some(Arc::new(entry)));
    }

    fn remove(&mut self, id: &str) -> bool {
        match self.by_id.remove(id) {
            Some(index) => {
                self.slots[index] = None;
                true
            }
            None => false,
        }
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Arc<KnowledgeEntry>)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(seq, slot)| slot.as_ref().map(|entry| (seq, entry)))
    }
}

pub struct KnowledgeStore {
    dimension: usize,
    entries: RwLock<Entries>,
    journal: Option<Journal>,
}

impl KnowledgeStore {
    /// Volatile store for embeddings of width `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: RwLock::new(Entries::default()),
            journal: None,
        }
    }

    /// Store journaled to `path`. Existing records are replayed first.
    pub fn open<P: AsRef<Path>>(path: P, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        let mut entries = Entries::default();

        for record in Journal::replay(path)? {
            match record {
                JournalRecord::Put { entry } => {
                    if entry.embedding.len() != dimension {
                        return Err(FlowError::EmbeddingMismatch {
                            expected: dimension,
                            actual: entry.embedding.len(),
                        });
                    }
                    entries.insert(entry);
                }
                JournalRecord::Delete { id } => {
                    entries.remove(&id);
                }
            }
        }

        info!(
            path = %path.display(),
            entries = entries.by_id.len(),
            "opened knowledge store"
        );

        Ok(Self {
            dimension,
            entries: RwLock::new(entries),
            journal: Some(Journal::open(path)?),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert an entry and return its id. An empty id is replaced by a UUID.
    pub fn store(&self, mut entry: KnowledgeEntry) -> Result<String> {
        self.check_dimension(&entry.embedding)?;
        if entry.content.trim().is_empty() {
            return Err(FlowError::Validation(
                "knowledge entry content must be non-empty".to_string(),
            ));
        }
        if entry.embedding.iter().any(|v| !v.is_finite()) {
            return Err(FlowError::Validation(
                "knowledge entry embedding contains non-finite values".to_string(),
            ));
        }
        if entry.id.trim().is_empty() {
            entry.id = Uuid::new_v4().to_string();
        }

        let mut entries = self.write();
        if entries.by_id.contains_key(&entry.id) {
            return Err(FlowError::Validation(format!(
                "knowledge entry '{}' already exists\n\nFix: entries are immutable; store a new entry with `supersedes: {}` in its metadata.",
                entry.id, entry.id
            )));
        }

        if let Some(journal) = &self.journal {
            journal.append(&JournalRecord::Put {
                entry: entry.clone(),
            })?;
        }

        let id = entry.id.clone();
        debug!(id = %id, source = %entry.source_type, "stored knowledge entry");
        entries.insert(entry);
        Ok(id)
    }

    /// Top-`k` entries by descending cosine similarity to `embedding`.
    ///
    /// Ties go to the most recently created entry. Superseded entries are
    /// skipped unless the filter asks for them.
    pub fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filter: Option<&KnowledgeFilter>,
    ) -> Result<Vec<ScoredEntry>> {
        self.check_dimension(embedding)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let entries = self.read();
        let include_superseded = filter.map(|f| f.include_superseded).unwrap_or(false);

        let mut hits: Vec<(usize, ScoredEntry)> = entries
            .live()
            .filter(|(_, entry)| include_superseded || !entries.superseded.contains(&entry.id))
            .filter(|(_, entry)| filter.is_none_or(|f| f.matches(entry)))
            .map(|(seq, entry)| {
                (
                    seq,
                    ScoredEntry {
                        score: cosine_similarity(embedding, &entry.embedding),
                        entry: Arc::clone(entry),
                    },
                )
            })
            .collect();
        drop(entries);

        hits.sort_by(|(seq_a, a), (seq_b, b)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
                .then_with(|| seq_b.cmp(seq_a))
        });
        hits.truncate(k);

        Ok(hits.into_iter().map(|(_, hit)| hit).collect())
    }

    pub fn get(&self, id: &str) -> Result<Arc<KnowledgeEntry>> {
        let entries = self.read();
        entries
            .by_id
            .get(id)
            .and_then(|&index| entries.slots[index].clone())
            .ok_or_else(|| FlowError::NotFound(format!("knowledge entry '{}'", id)))
    }

    /// Entries whose metadata has `key == value`, most recent first.
    pub fn find_by_metadata(&self, key: &str, value: &serde_json::Value) -> Vec<Arc<KnowledgeEntry>> {
        let entries = self.read();
        let mut found: Vec<Arc<KnowledgeEntry>> = entries
            .live()
            .filter(|(_, entry)| entry.metadata.get(key) == Some(value))
            .map(|(_, entry)| Arc::clone(entry))
            .collect();
        found.reverse();
        found
    }

    /// Administrative removal.
    pub fn delete(&self, id: &str) -> Result<()> {
        let mut entries = self.write();
        if !entries.by_id.contains_key(id) {
            return Err(FlowError::NotFound(format!("knowledge entry '{}'", id)));
        }
        if let Some(journal) = &self.journal {
            journal.append(&JournalRecord::Delete { id: id.to_string() })?;
        }
        entries.remove(id);
        info!(id, "deleted knowledge entry");
        Ok(())
    }

    pub fn stats(&self) -> KnowledgeStats {
        let entries = self.read();
        let mut by_source_type = BTreeMap::new();
        for (_, entry) in entries.live() {
            *by_source_type
                .entry(entry.source_type.as_str().to_string())
                .or_insert(0) += 1;
        }
        let superseded = entries
            .superseded
            .iter()
            .filter(|id| entries.by_id.contains_key(*id))
            .count();

        KnowledgeStats {
            total: entries.by_id.len(),
            dimension: self.dimension,
            by_source_type,
            superseded,
        }
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(FlowError::EmbeddingMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Entries> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Entries> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cosine similarity; zero vectors score 0.
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
