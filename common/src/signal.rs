use crate::events::SignalTrigger;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Expected price direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The primary weights that were active when a confidence was fused
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActiveWeights {
    pub w_src: f64,
    pub w_novel: f64,
    pub w_evt: f64,
    pub w_buzz: f64,
}

/// Every intermediate quantity of a fusion, kept for audit and evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionComponents {
    pub source_weight: f64,
    pub novelty: f64,
    pub event_prior: f64,
    /// `sigmoid(buzz)`
    pub buzz_score: f64,
    pub base_score: f64,
    pub consistency_adj: f64,
    pub uncertainty_adj: f64,
    pub time_decay: f64,
    pub raw_score: f64,
    pub weights: ActiveWeights,
    /// Set when the history store was unreachable and defaults were used
    #[serde(default)]
    pub history_degraded: bool,
}

/// A ranked, explainable trading signal. Corrections create new signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub ticker: String,
    pub signal_time: DateTime<Utc>,
    pub base_score: f64,
    pub confidence: f64,
    pub direction: Direction,
    pub label: String,
    /// Decay constant applied to this signal, in seconds
    pub decay_seconds: i64,
    pub trigger: SignalTrigger,
    /// Content hash of the document the signal was derived from
    pub document_hash: String,
    pub components: FusionComponents,
    pub alert_reason: Option<String>,
    pub requires_second_source: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    Document,
    Event,
}

impl EvidenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvidenceKind::Document => "document",
            EvidenceKind::Event => "event",
        }
    }
}

/// A document or event cited in support of a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalEvidence {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub kind: EvidenceKind,
    /// Document content hash, or extracted event id
    pub ref_id: String,
    /// Weight in [0, 1]
    pub weight: f64,
    pub details: serde_json::Value,
}
