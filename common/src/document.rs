use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Document-level sentiment label produced by the upstream NLP stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

/// A news document after canonicalization and NLP enrichment.
///
/// Produced by the ingestion collaborators and read-only to the engine.
/// `content_hash` is the dedup key; it is filled from `raw_text` by
/// [`NormalizedDocument::with_content_hash`] when the producer left it empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedDocument {
    #[serde(default)]
    pub content_hash: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub raw_text: String,
    pub sentiment: SentimentLabel,
    pub sentiment_score: f64,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Mentioned ticker symbols, first mention first, no duplicates
    #[serde(default)]
    pub tickers: Vec<String>,
}

impl NormalizedDocument {
    /// SHA-256 hex digest of the document text
    pub fn compute_content_hash(text: &str) -> String {
        hex::encode(Sha256::digest(text.as_bytes()))
    }

    /// Fill in a missing content hash and drop repeated ticker mentions
    pub fn with_content_hash(mut self) -> Self {
        if self.content_hash.trim().is_empty() {
            self.content_hash = Self::compute_content_hash(&self.raw_text);
        }
        let mut seen = std::collections::HashSet::new();
        self.tickers.retain(|t| seen.insert(t.to_uppercase()));
        self
    }

    pub fn mentions(&self, ticker: &str) -> bool {
        self.tickers.iter().any(|t| t.eq_ignore_ascii_case(ticker))
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("Untitled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(text: &str) -> NormalizedDocument {
        NormalizedDocument {
            content_hash: String::new(),
            published_at: Utc::now(),
            source: "reuters".to_string(),
            title: None,
            url: None,
            raw_text: text.to_string(),
            sentiment: SentimentLabel::Neutral,
            sentiment_score: 0.5,
            embedding: None,
            tickers: vec!["ACME".to_string(), "acme".to_string(), "XYZ".to_string()],
        }
    }

    #[test]
    fn test_content_hash_is_filled_and_stable() {
        let a = doc("same text").with_content_hash();
        let b = doc("same text").with_content_hash();
        assert_eq!(a.content_hash.len(), 64);
        assert_eq!(a.content_hash, b.content_hash);
        assert_ne!(a.content_hash, doc("other text").with_content_hash().content_hash);
    }

    #[test]
    fn test_existing_hash_is_kept_and_tickers_deduped() {
        let mut d = doc("text");
        d.content_hash = "abc".to_string();
        let d = d.with_content_hash();
        assert_eq!(d.content_hash, "abc");
        assert_eq!(d.tickers, vec!["ACME".to_string(), "XYZ".to_string()]);
        assert!(d.mentions("xyz"));
    }

    #[test]
    fn test_deserialize_minimal_record() {
        let json = r#"{
            "published_at": "2024-05-01T12:00:00Z",
            "source": "bloomberg",
            "raw_text": "Acme Corp (ACME) beats earnings estimates",
            "sentiment": "positive",
            "sentiment_score": 0.9,
            "tickers": ["ACME"]
        }"#;
        let d: NormalizedDocument = serde_json::from_str(json).unwrap();
        assert_eq!(d.sentiment, SentimentLabel::Positive);
        assert!(d.embedding.is_none());
        assert!(d.content_hash.is_empty());
    }
}
