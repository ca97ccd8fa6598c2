// Document History
// Windowed access to previously ingested documents, per ticker

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::NormalizedDocument;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A time window over one ticker's documents
#[derive(Debug, Clone)]
pub struct HistoryWindow {
    pub ticker: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Whether a document published exactly at `to` is inside the window
    pub include_end: bool,
    /// Content hash left out of the result, normally the document being scored
    pub exclude_hash: Option<String>,
}

impl HistoryWindow {
    pub fn contains(&self, doc: &HistoricalDocument) -> bool {
        if doc.published_at < self.from {
            return false;
        }
        let before_end = if self.include_end {
            doc.published_at <= self.to
        } else {
            doc.published_at < self.to
        };
        before_end
            && self.exclude_hash.as_deref() != Some(doc.content_hash.as_str())
            && doc.tickers.iter().any(|t| t.eq_ignore_ascii_case(&self.ticker))
    }
}

/// What the history keeps of an ingested document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalDocument {
    pub content_hash: String,
    pub source: String,
    pub title: Option<String>,
    pub published_at: DateTime<Utc>,
    pub tickers: Vec<String>,
    pub embedding: Option<Vec<f32>>,
}

impl From<&NormalizedDocument> for HistoricalDocument {
    fn from(doc: &NormalizedDocument) -> Self {
        Self {
            content_hash: doc.content_hash.clone(),
            source: doc.source.clone(),
            title: doc.title.clone(),
            published_at: doc.published_at,
            tickers: doc.tickers.clone(),
            embedding: doc.embedding.clone(),
        }
    }
}

/// Trait for document history backends
#[async_trait::async_trait]
pub trait DocumentHistory: Send + Sync {
    /// Record a document. Returns `false` when its content hash is already
    /// present; of concurrent inserts of one hash exactly one returns `true`.
    async fn insert(&self, doc: &NormalizedDocument) -> Result<bool>;

    /// Whether a content hash has been ingested
    async fn contains(&self, content_hash: &str) -> Result<bool>;

    /// Documents inside the window, most recent first, at most `limit`
    async fn documents(&self, window: &HistoryWindow, limit: usize) -> Result<Vec<HistoricalDocument>>;

    /// Number of documents inside the window
    async fn count(&self, window: &HistoryWindow) -> Result<usize>;
}

/// In-memory document history (for testing and development)
pub struct InMemoryDocumentStore {
    documents: DashMap<String, Arc<HistoricalDocument>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            documents: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn matching(&self, window: &HistoryWindow) -> Vec<Arc<HistoricalDocument>> {
        self.documents
            .iter()
            .filter(|entry| window.contains(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl DocumentHistory for InMemoryDocumentStore {
    async fn insert(&self, doc: &NormalizedDocument) -> Result<bool> {
        match self.documents.entry(doc.content_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(HistoricalDocument::from(doc)));
                Ok(true)
            }
        }
    }

    async fn contains(&self, content_hash: &str) -> Result<bool> {
        Ok(self.documents.contains_key(content_hash))
    }

    async fn documents(&self, window: &HistoryWindow, limit: usize) -> Result<Vec<HistoricalDocument>> {
        let mut docs = self.matching(window);
        docs.sort_by(|a, b| b.published_at.cmp(&a.published_at));
        docs.truncate(limit);
        Ok(docs.into_iter().map(|d| (*d).clone()).collect())
    }

    async fn count(&self, window: &HistoryWindow) -> Result<usize> {
        Ok(self.matching(window).len())
    }
}
