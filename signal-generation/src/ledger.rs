// Evidence Ledger
// Append-only record of signals, the evidence behind them, and the audit trail

use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{
    AuditAction, AuditEntry, EvidenceKind, ExtractedEvent, NormalizedDocument, Signal,
    SignalEvidence, SignalTrigger, TargetType,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Identity of a signal for idempotence: one signal per document, ticker,
/// trigger and match position
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignalKey {
    pub document_hash: String,
    pub ticker: String,
    pub trigger: SignalTrigger,
    /// Character offset of the triggering match; 0 for sentiment signals
    pub offset: usize,
}

impl SignalKey {
    pub fn for_event(document_hash: &str, ticker: &str, event: &ExtractedEvent) -> Self {
        Self {
            document_hash: document_hash.to_string(),
            ticker: ticker.to_uppercase(),
            trigger: SignalTrigger::Event(event.category),
            offset: event.payload.match_offset,
        }
    }

    pub fn for_sentiment(document_hash: &str, ticker: &str) -> Self {
        Self {
            document_hash: document_hash.to_string(),
            ticker: ticker.to_uppercase(),
            trigger: SignalTrigger::Sentiment,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// A signal with the same key already exists; nothing was written
    Duplicate,
}

/// Document evidence row: weight 1.0
pub fn document_evidence(signal_id: Uuid, doc: &NormalizedDocument, novelty: f64) -> SignalEvidence {
    SignalEvidence {
        id: Uuid::new_v4(),
        signal_id,
        kind: EvidenceKind::Document,
        ref_id: doc.content_hash.clone(),
        weight: 1.0,
        details: json!({
            "title": doc.title,
            "url": doc.url,
            "source": doc.source,
            "sentiment": doc.sentiment.as_str(),
            "sentiment_score": doc.sentiment_score,
            "novelty": novelty,
        }),
    }
}

/// Event evidence row, weighted by extraction confidence
pub fn event_evidence(signal_id: Uuid, event: &ExtractedEvent) -> SignalEvidence {
    SignalEvidence {
        id: Uuid::new_v4(),
        signal_id,
        kind: EvidenceKind::Event,
        ref_id: event.id.to_string(),
        weight: common::clamp01(event.confidence),
        details: json!({
            "category": event.category.as_str(),
            "headline": event.headline,
            "matched_text": event.payload.matched_text,
            "match_offset": event.payload.match_offset,
        }),
    }
}

/// Ledger statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub total_signals: usize,
    pub total_evidence: usize,
    pub total_audit_entries: usize,
    pub signals_by_trigger: HashMap<String, usize>,
    pub newest_signal: Option<DateTime<Utc>>,
}

/// Trait for evidence ledger backends
#[async_trait::async_trait]
pub trait EvidenceLedger: Send + Sync {
    /// Write a signal, its evidence and its audit entry as one unit.
    /// A key that was already recorded writes nothing.
    async fn record_signal(
        &self,
        key: &SignalKey,
        signal: &Signal,
        evidence: &[SignalEvidence],
        audit: AuditEntry,
    ) -> Result<RecordOutcome>;

    /// Append an audit entry
    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;

    /// Retrieve a signal by ID
    async fn get_signal(&self, signal_id: Uuid) -> Result<Option<Signal>>;

    /// Signals for a ticker, newest first
    async fn signals_for_ticker(&self, ticker: &str) -> Result<Vec<Signal>>;

    /// Evidence rows of a signal
    async fn evidence_for(&self, signal_id: Uuid) -> Result<Vec<SignalEvidence>>;

    /// Audit entries for one target, newest first
    async fn audit_for_target(&self, target_type: TargetType, target_id: &str) -> Result<Vec<AuditEntry>>;

    /// Most recent audit entries, newest first
    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>>;

    async fn stats(&self) -> Result<LedgerStats>;
}

#[derive(Default)]
struct LedgerState {
    signals: HashMap<Uuid, Signal>,
    keys: HashMap<SignalKey, Uuid>,
    evidence: HashMap<Uuid, Vec<SignalEvidence>>,
    /// Insertion order
    audit: Vec<AuditEntry>,
}

/// In-memory ledger (for testing and development)
pub struct InMemoryLedger {
    state: tokio::sync::RwLock<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self {
            state: tokio::sync::RwLock::new(LedgerState::default()),
        }
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Newest first; entries with equal timestamps keep reverse insertion order
fn newest_first<'a>(entries: impl DoubleEndedIterator<Item = &'a AuditEntry>) -> Vec<AuditEntry> {
    let mut out: Vec<AuditEntry> = entries.rev().cloned().collect();
    out.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
    out
}

#[async_trait::async_trait]
impl EvidenceLedger for InMemoryLedger {
    async fn record_signal(
        &self,
        key: &SignalKey,
        signal: &Signal,
        evidence: &[SignalEvidence],
        audit: AuditEntry,
    ) -> Result<RecordOutcome> {
        let mut state = self.state.write().await;
        if state.keys.contains_key(key) {
            return Ok(RecordOutcome::Duplicate);
        }
        state.keys.insert(key.clone(), signal.id);
        state.signals.insert(signal.id, signal.clone());
        state.evidence.insert(signal.id, evidence.to_vec());
        state.audit.push(audit);
        Ok(RecordOutcome::Recorded)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        let mut state = self.state.write().await;
        state.audit.push(entry);
        Ok(())
    }

    async fn get_signal(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        let state = self.state.read().await;
        Ok(state.signals.get(&signal_id).cloned())
    }

    async fn signals_for_ticker(&self, ticker: &str) -> Result<Vec<Signal>> {
        let state = self.state.read().await;
        let mut signals: Vec<Signal> = state
            .signals
            .values()
            .filter(|s| s.ticker.eq_ignore_ascii_case(ticker))
            .cloned()
            .collect();
        signals.sort_by(|a, b| {
            b.signal_time
                .cmp(&a.signal_time)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(signals)
    }

    async fn evidence_for(&self, signal_id: Uuid) -> Result<Vec<SignalEvidence>> {
        let state = self.state.read().await;
        Ok(state.evidence.get(&signal_id).cloned().unwrap_or_default())
    }

    async fn audit_for_target(&self, target_type: TargetType, target_id: &str) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .audit
                .iter()
                .filter(|e| e.target_type == target_type && e.target_id == target_id),
        ))
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let state = self.state.read().await;
        let mut entries = newest_first(state.audit.iter());
        entries.truncate(limit);
        Ok(entries)
    }

    async fn stats(&self) -> Result<LedgerStats> {
        let state = self.state.read().await;

        let mut signals_by_trigger = HashMap::new();
        for signal in state.signals.values() {
            *signals_by_trigger
                .entry(signal.trigger.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(LedgerStats {
            total_signals: state.signals.len(),
            total_evidence: state.evidence.values().map(Vec::len).sum(),
            total_audit_entries: state.audit.len(),
            signals_by_trigger,
            newest_signal: state.signals.values().map(|s| s.created_at).max(),
        })
    }
}

/// Audit entry for a newly created signal
pub fn create_signal_audit(actor: &str, signal: &Signal) -> AuditEntry {
    AuditEntry::new(
        actor,
        AuditAction::CreateSignal,
        TargetType::Signal,
        signal.id.to_string(),
        json!({
            "ticker": signal.ticker,
            "trigger": signal.trigger.as_str(),
            "document_hash": signal.document_hash,
            "confidence": signal.confidence,
            "direction": signal.direction.as_str(),
        }),
    )
}
