//! Novelty and buzz over a ticker's recent document history.
//!
//! Novelty compares the candidate's embedding with the ticker's documents
//! from the lookback window. Buzz counts the ticker's documents in a short
//! trailing window and maps the count through a fixed bucket table; the
//! table stands in for a z-score against the ticker's own volume history,
//! which is not tracked.

use crate::history::{DocumentHistory, HistoricalDocument, HistoryWindow};
use crate::settings::NoveltySettings;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use common::{clamp01, sigmoid, NormalizedDocument};
use std::sync::Arc;
use tracing::{debug, warn};

/// Share of the maximum similarity in the combined similarity
const MAX_SIMILARITY_WEIGHT: f64 = 0.7;
const MEAN_SIMILARITY_WEIGHT: f64 = 0.3;
/// Steepness of the sigmoid stretching raw novelty around 0.5
const NOVELTY_STEEPNESS: f64 = 3.0;
/// Buzz used when the history cannot be queried
const NEUTRAL_BUZZ: f64 = 0.5;

/// Cosine similarity; `None` for mismatched dimensions. A zero vector is
/// similar to nothing.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Some(0.0);
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Novelty from the candidate's similarities to its comparison set
pub fn novelty_from_similarities(similarities: &[f64]) -> Option<f64> {
    if similarities.is_empty() {
        return None;
    }
    let max = similarities.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = similarities.iter().sum::<f64>() / similarities.len() as f64;
    let combined = MAX_SIMILARITY_WEIGHT * max + MEAN_SIMILARITY_WEIGHT * mean;
    let raw = 1.0 - combined;
    Some(clamp01(sigmoid(NOVELTY_STEEPNESS * (2.0 * raw - 1.0))))
}

/// Pseudo z-score for a document count
pub fn buzz_bucket(count: usize) -> f64 {
    match count {
        0..=1 => -1.0,
        2..=3 => 0.0,
        4..=5 => 0.5,
        6..=10 => 1.0,
        _ => 2.0,
    }
}

/// Windowed statistics for one (document, ticker) pair
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub novelty: f64,
    pub buzz: f64,
    pub has_second_source: bool,
    /// Titles of the other documents on the ticker in the buzz window
    pub related_titles: Vec<String>,
    /// At least one history query failed and a default was used
    pub degraded: bool,
}

/// Computes novelty and buzz against a [`DocumentHistory`]
pub struct NoveltyCalculator {
    history: Arc<dyn DocumentHistory>,
    settings: NoveltySettings,
}

impl NoveltyCalculator {
    pub fn new(history: Arc<dyn DocumentHistory>, settings: NoveltySettings) -> Self {
        Self { history, settings }
    }

    pub fn settings(&self) -> &NoveltySettings {
        &self.settings
    }

    fn lookback_window(&self, doc: &NormalizedDocument, ticker: &str) -> HistoryWindow {
        HistoryWindow {
            ticker: ticker.to_string(),
            from: doc.published_at - Duration::days(self.settings.lookback_days),
            to: doc.published_at,
            include_end: false,
            exclude_hash: Some(doc.content_hash.clone()),
        }
    }

    fn buzz_window(&self, ticker: &str, published_at: DateTime<Utc>) -> HistoryWindow {
        HistoryWindow {
            ticker: ticker.to_string(),
            from: published_at - Duration::hours(self.settings.buzz_window_hours),
            to: published_at,
            include_end: true,
            exclude_hash: None,
        }
    }

    /// Novelty of `doc` relative to the ticker's lookback window
    pub async fn novelty(&self, doc: &NormalizedDocument, ticker: &str) -> Result<f64> {
        let Some(embedding) = doc.embedding.as_deref() else {
            debug!("No embedding for {}, using cold-start novelty", doc.content_hash);
            return Ok(self.settings.cold_start_novelty);
        };

        let window = self.lookback_window(doc, ticker);
        let comparison = self
            .history
            .documents(&window, self.settings.history_limit)
            .await?;

        let similarities: Vec<f64> = comparison
            .iter()
            .filter_map(|d| d.embedding.as_deref())
            .filter_map(|e| cosine_similarity(embedding, e))
            .collect();

        match novelty_from_similarities(&similarities) {
            Some(novelty) => Ok(novelty),
            None => {
                debug!(
                    "No usable comparison documents for {} ({} in window), cold start",
                    ticker,
                    comparison.len()
                );
                Ok(self.settings.cold_start_novelty)
            }
        }
    }

    /// Buzz for a ticker at `published_at`; the window end is inclusive
    pub async fn buzz(&self, ticker: &str, published_at: DateTime<Utc>) -> Result<f64> {
        let count = self
            .history
            .count(&self.buzz_window(ticker, published_at))
            .await?;
        Ok(sigmoid(buzz_bucket(count)))
    }

    /// Other documents on the ticker inside the buzz window
    pub async fn corroborating(
        &self,
        doc: &NormalizedDocument,
        ticker: &str,
    ) -> Result<Vec<HistoricalDocument>> {
        let mut window = self.buzz_window(ticker, doc.published_at);
        window.exclude_hash = Some(doc.content_hash.clone());
        self.history.documents(&window, usize::MAX).await
    }

    /// All windowed statistics for one document and ticker. History
    /// failures fall back to defaults and mark the result degraded.
    pub async fn assess(&self, doc: &NormalizedDocument, ticker: &str) -> WindowStats {
        let mut degraded = false;

        let novelty = match self.novelty(doc, ticker).await {
            Ok(novelty) => novelty,
            Err(e) => {
                warn!("Novelty lookup failed for {}: {:#}", ticker, e);
                degraded = true;
                self.settings.cold_start_novelty
            }
        };

        let buzz = match self.buzz(ticker, doc.published_at).await {
            Ok(buzz) => buzz,
            Err(e) => {
                warn!("Buzz lookup failed for {}: {:#}", ticker, e);
                degraded = true;
                NEUTRAL_BUZZ
            }
        };

        let (has_second_source, related_titles) = match self.corroborating(doc, ticker).await {
            Ok(others) => {
                let second = others
                    .iter()
                    .any(|d| !d.source.trim().eq_ignore_ascii_case(doc.source.trim()));
                let titles = others.into_iter().filter_map(|d| d.title).collect();
                (second, titles)
            }
            Err(e) => {
                warn!("Second-source lookup failed for {}: {:#}", ticker, e);
                degraded = true;
                (false, Vec::new())
            }
        };

        WindowStats {
            novelty,
            buzz,
            has_second_source,
            related_titles,
            degraded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::InMemoryDocumentStore;
    use common::SentimentLabel;

    fn doc(text: &str, source: &str, at: DateTime<Utc>, embedding: Option<Vec<f32>>) -> NormalizedDocument {
        NormalizedDocument {
            content_hash: String::new(),
            published_at: at,
            source: source.to_string(),
            title: Some(text.to_string()),
            url: None,
            raw_text: text.to_string(),
            sentiment: SentimentLabel::Neutral,
            sentiment_score: 0.5,
            embedding,
            tickers: vec!["ACME".to_string()],
        }
        .with_content_hash()
    }

    fn calculator(store: Arc<InMemoryDocumentStore>) -> NoveltyCalculator {
        NoveltyCalculator::new(store, NoveltySettings::default())
    }

    struct FailingHistory;

    #[async_trait::async_trait]
    impl DocumentHistory for FailingHistory {
        async fn insert(&self, _doc: &NormalizedDocument) -> Result<bool> {
            anyhow::bail!("history store unreachable")
        }
        async fn contains(&self, _hash: &str) -> Result<bool> {
            anyhow::bail!("history store unreachable")
        }
        async fn documents(&self, _w: &HistoryWindow, _limit: usize) -> Result<Vec<HistoricalDocument>> {
            anyhow::bail!("history store unreachable")
        }
        async fn count(&self, _w: &HistoryWindow) -> Result<usize> {
            anyhow::bail!("history store unreachable")
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]).unwrap() - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).unwrap().abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]).is_none());
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), Some(0.0));
    }

    #[test]
    fn test_novelty_decreases_with_similarity() {
        let low = novelty_from_similarities(&[0.1, 0.1]).unwrap();
        let mid = novelty_from_similarities(&[0.5, 0.1]).unwrap();
        let high = novelty_from_similarities(&[0.95, 0.1]).unwrap();
        assert!(low > mid && mid > high);
        assert!(novelty_from_similarities(&[]).is_none());

        // combined = 0.5 sits on the sigmoid midpoint
        assert!((novelty_from_similarities(&[0.5]).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_buzz_buckets() {
        assert_eq!(buzz_bucket(0), -1.0);
        assert_eq!(buzz_bucket(1), -1.0);
        assert_eq!(buzz_bucket(3), 0.0);
        assert_eq!(buzz_bucket(5), 0.5);
        assert_eq!(buzz_bucket(10), 1.0);
        assert_eq!(buzz_bucket(11), 2.0);
    }

    #[tokio::test]
    async fn test_cold_start_is_fully_novel() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let d = doc("first", "reuters", Utc::now(), Some(vec![1.0, 0.0]));
        store.insert(&d).await.unwrap();

        assert_eq!(calc.novelty(&d, "ACME").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_missing_or_mismatched_embeddings_are_skipped() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        store.insert(&doc("a", "dj", now - Duration::hours(3), None)).await.unwrap();
        store
            .insert(&doc("b", "dj", now - Duration::hours(2), Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();

        let d = doc("c", "dj", now, Some(vec![1.0, 0.0]));
        assert_eq!(calc.novelty(&d, "ACME").await.unwrap(), 1.0);

        let no_embedding = doc("d", "dj", now, None);
        assert_eq!(calc.novelty(&no_embedding, "ACME").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_zero_vectors_count_as_dissimilar() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        store
            .insert(&doc("earlier", "dj", now - Duration::hours(1), Some(vec![1.0, 0.0])))
            .await
            .unwrap();

        let blank = doc("blank", "dj", now, Some(vec![0.0, 0.0]));
        let novelty = calc.novelty(&blank, "ACME").await.unwrap();
        assert!((novelty - sigmoid(3.0)).abs() < 1e-9);

        // A zero-vector history document still enters the mean term
        store
            .insert(&doc("empty", "dj", now - Duration::hours(2), Some(vec![0.0, 0.0])))
            .await
            .unwrap();
        let same = doc("same", "dj", now, Some(vec![1.0, 0.0]));
        let expected = novelty_from_similarities(&[1.0, 0.0]).unwrap();
        assert!((calc.novelty(&same, "ACME").await.unwrap() - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_similar_history_lowers_novelty() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        store
            .insert(&doc("earlier", "dj", now - Duration::hours(5), Some(vec![1.0, 0.1])))
            .await
            .unwrap();

        let same = doc("same story", "dj", now, Some(vec![1.0, 0.1]));
        let fresh = doc("new story", "dj", now, Some(vec![-0.1, 1.0]));
        let same_novelty = calc.novelty(&same, "ACME").await.unwrap();
        let fresh_novelty = calc.novelty(&fresh, "ACME").await.unwrap();
        assert!(same_novelty < 0.1);
        assert!(fresh_novelty > same_novelty);
    }

    #[tokio::test]
    async fn test_own_document_is_not_history() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        // Backdated copy with the same hash: only the exclusion keeps it out
        let d = doc("story", "dj", now, Some(vec![1.0, 0.0]));
        let mut stored = d.clone();
        stored.published_at = now - Duration::hours(1);
        store.insert(&stored).await.unwrap();

        assert_eq!(calc.novelty(&d, "ACME").await.unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_buzz_counts_current_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        let d = doc("only", "dj", now, None);
        store.insert(&d).await.unwrap();
        assert!((calc.buzz("ACME", now).await.unwrap() - sigmoid(-1.0)).abs() < 1e-9);

        for i in 1..=3 {
            store
                .insert(&doc(&format!("more {}", i), "dj", now - Duration::hours(i), None))
                .await
                .unwrap();
        }
        store
            .insert(&doc("too old", "dj", now - Duration::hours(30), None))
            .await
            .unwrap();
        assert!((calc.buzz("ACME", now).await.unwrap() - sigmoid(0.5)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_second_source_requires_different_source() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let calc = calculator(store.clone());
        let now = Utc::now();
        let d = doc("main", "Reuters", now, None);
        store.insert(&d).await.unwrap();
        store
            .insert(&doc("echo", "reuters", now - Duration::hours(1), None))
            .await
            .unwrap();

        let stats = calc.assess(&d, "ACME").await;
        assert!(!stats.has_second_source);
        assert_eq!(stats.related_titles, vec!["echo".to_string()]);

        store
            .insert(&doc("confirmation", "bloomberg", now - Duration::hours(2), None))
            .await
            .unwrap();
        assert!(calc.assess(&d, "ACME").await.has_second_source);
    }

    #[tokio::test]
    async fn test_history_failure_degrades() {
        let calc = NoveltyCalculator::new(Arc::new(FailingHistory), NoveltySettings::default());
        let d = doc("story", "dj", Utc::now(), Some(vec![1.0, 0.0]));

        let stats = calc.assess(&d, "ACME").await;
        assert!(stats.degraded);
        assert_eq!(stats.novelty, 1.0);
        assert_eq!(stats.buzz, 0.5);
        assert!(!stats.has_second_source);
    }
}
