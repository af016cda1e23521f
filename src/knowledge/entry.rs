use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Where a knowledge entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceType {
    Document,
    Code,
    SuccessPattern,
    FailurePattern,
}

impl SourceType {
    /// Parse a source type. Accepts `doc`/`documentation` and snake_case spellings.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "document" | "doc" | "documentation" => Some(Self::Document),
            "code" => Some(Self::Code),
            "success-pattern" | "success" => Some(Self::SuccessPattern),
            "failure-pattern" | "failure" => Some(Self::FailurePattern),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::Code => "code",
            SourceType::SuccessPattern => "success-pattern",
            SourceType::FailurePattern => "failure-pattern",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable record of embedded text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub source_type: SourceType,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl KnowledgeEntry {
    pub fn new(content: impl Into<String>, embedding: Vec<f32>, source_type: SourceType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            embedding,
            metadata: BTreeMap::new(),
            source_type,
            created_at: Utc::now(),
            tags: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Mark this entry as the replacement for `id`.
    pub fn superseding(self, id: impl Into<String>) -> Self {
        self.with_metadata(super::SUPERSEDES_KEY, serde_json::Value::String(id.into()))
    }

    pub fn supersedes(&self) -> Option<&str> {
        self.metadata
            .get(super::SUPERSEDES_KEY)
            .and_then(|v| v.as_str())
    }
}

/// Restricts which entries a query considers. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnowledgeFilter {
    pub source_types: Vec<SourceType>,
    /// Entry must carry at least one of these tags.
    pub tags_any: Vec<String>,
    /// Entry metadata must contain every pair exactly.
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub include_superseded: bool,
}

impl KnowledgeFilter {
    pub fn source(source_type: SourceType) -> Self {
        Self {
            source_types: vec![source_type],
            ..Self::default()
        }
    }

    pub fn with_source(mut self, source_type: SourceType) -> Self {
        self.source_types.push(source_type);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags_any.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn matches(&self, entry: &KnowledgeEntry) -> bool {
        if !self.source_types.is_empty() && !self.source_types.contains(&entry.source_type) {
            return false;
        }
        if !self.tags_any.is_empty() && !self.tags_any.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }
        self.metadata
            .iter()
            .all(|(key, value)| entry.metadata.get(key) == Some(value))
    }
}

/// Query hit with its cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredEntry {
    pub entry: Arc<KnowledgeEntry>,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub total: usize,
    pub dimension: usize,
    pub by_source_type: BTreeMap<String, usize>,
    pub superseded: usize,
}
