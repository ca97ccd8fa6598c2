use anyhow::Result;
use chrono::{Duration, Utc};
use common::{
    AuditAction, AuditEntry, Direction, EventCategory, EvidenceKind, NormalizedDocument,
    SentimentLabel, Signal, SignalEvidence, SignalTrigger, TargetType,
};
use event_extraction::EventExtractor;
use serde_json::json;
use signal_generation::{
    AlertDispatcher, AlertNotifier, AlertPayload, DocumentHistory, DocumentOutcome,
    EvidenceLedger, FuserConfigStore, InMemoryDocumentStore, InMemoryLedger, LedgerStats,
    NoveltyCalculator, NoveltySettings, RecordOutcome, SignalEngine, SignalFuser, SignalKey,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<AlertPayload>>,
}

#[async_trait::async_trait]
impl AlertNotifier for RecordingNotifier {
    async fn notify(&self, alert: &AlertPayload) -> Result<()> {
        self.alerts.lock().await.push(alert.clone());
        Ok(())
    }
}

/// Ledger that fails `record_signal` for one category, or for the next
/// `failures` calls of any category
struct FlakyLedger {
    inner: InMemoryLedger,
    failures: AtomicUsize,
    failing_category: Option<EventCategory>,
}

impl FlakyLedger {
    fn failing_next(failures: usize) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            failures: AtomicUsize::new(failures),
            failing_category: None,
        }
    }

    fn failing_on(category: EventCategory) -> Self {
        Self {
            inner: InMemoryLedger::new(),
            failures: AtomicUsize::new(0),
            failing_category: Some(category),
        }
    }

    fn should_fail(&self, signal: &Signal) -> bool {
        if self.failing_category.is_some() && signal.trigger.category() == self.failing_category {
            return true;
        }
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl EvidenceLedger for FlakyLedger {
    async fn record_signal(
        &self,
        key: &SignalKey,
        signal: &Signal,
        evidence: &[SignalEvidence],
        audit: AuditEntry,
    ) -> Result<RecordOutcome> {
        if self.should_fail(signal) {
            anyhow::bail!("ledger timeout");
        }
        self.inner.record_signal(key, signal, evidence, audit).await
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.inner.append_audit(entry).await
    }

    async fn get_signal(&self, signal_id: Uuid) -> Result<Option<Signal>> {
        self.inner.get_signal(signal_id).await
    }

    async fn signals_for_ticker(&self, ticker: &str) -> Result<Vec<Signal>> {
        self.inner.signals_for_ticker(ticker).await
    }

    async fn evidence_for(&self, signal_id: Uuid) -> Result<Vec<SignalEvidence>> {
        self.inner.evidence_for(signal_id).await
    }

    async fn audit_for_target(&self, target_type: TargetType, target_id: &str) -> Result<Vec<AuditEntry>> {
        self.inner.audit_for_target(target_type, target_id).await
    }

    async fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        self.inner.recent_audit(limit).await
    }

    async fn stats(&self) -> Result<LedgerStats> {
        self.inner.stats().await
    }
}

struct Harness {
    engine: SignalEngine,
    ledger: Arc<dyn EvidenceLedger>,
    notifier: Arc<RecordingNotifier>,
}

fn harness_with(ledger: Arc<dyn EvidenceLedger>) -> Harness {
    let history: Arc<dyn DocumentHistory> = Arc::new(InMemoryDocumentStore::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let dispatcher = AlertDispatcher::spawn(notifier.clone(), ledger.clone(), 16);

    let engine = SignalEngine::new(
        EventExtractor::with_default_patterns(),
        NoveltyCalculator::new(history.clone(), NoveltySettings::default()),
        SignalFuser::new(Arc::new(FuserConfigStore::default())),
        history,
        ledger.clone(),
    )
    .with_dispatcher(dispatcher);

    Harness {
        engine,
        ledger,
        notifier,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(InMemoryLedger::new()))
}

fn acme_document() -> NormalizedDocument {
    NormalizedDocument {
        content_hash: String::new(),
        published_at: Utc::now(),
        source: "bloomberg".to_string(),
        title: Some("Acme beats".to_string()),
        url: Some("https://news.example.com/acme-beats".to_string()),
        raw_text: "Acme Corp (ACME) beats earnings estimates".to_string(),
        sentiment: SentimentLabel::Positive,
        sentiment_score: 0.9,
        embedding: Some(vec![0.2, 0.9, 0.1, 0.4]),
        tickers: vec!["ACME".to_string()],
    }
}

#[tokio::test]
async fn test_acme_earnings_beat_scenario() {
    let h = harness();

    let outcome = h.engine.process_document(acme_document()).await.unwrap();
    assert_eq!(
        outcome,
        DocumentOutcome::Processed {
            events: 1,
            signals: 1,
            alerts: 1
        }
    );

    let signals = h.ledger.signals_for_ticker("ACME").await.unwrap();
    assert_eq!(signals.len(), 1);
    let signal = &signals[0];
    assert_eq!(signal.trigger, SignalTrigger::Event(EventCategory::EarningsBeat));
    assert_eq!(signal.components.novelty, 1.0);
    assert_eq!(signal.components.source_weight, 0.95);
    assert_eq!(signal.components.event_prior, 0.75);
    assert_eq!(signal.direction, Direction::Up);
    assert!(signal.confidence >= 0.6);
    assert!((signal.confidence - 0.855).abs() < 0.01);
    assert_eq!(signal.label, "Earnings Beat (High Confidence)");
    assert_eq!(signal.alert_reason.as_deref(), Some("high-priority source"));
    assert!(!signal.components.history_degraded);

    let evidence = h.ledger.evidence_for(signal.id).await.unwrap();
    assert_eq!(evidence.len(), 2);
    let doc_row = evidence.iter().find(|e| e.kind == EvidenceKind::Document).unwrap();
    assert_eq!(doc_row.weight, 1.0);
    assert_eq!(doc_row.details["novelty"], 1.0);
    assert_eq!(doc_row.details["title"], "Acme beats");
    let event_row = evidence.iter().find(|e| e.kind == EvidenceKind::Event).unwrap();
    assert!((event_row.weight - 0.85).abs() < 1e-9);
    assert_eq!(event_row.details["headline"], "ACME Beats Earnings Estimates");

    let Harness {
        engine,
        ledger,
        notifier,
    } = h;
    engine.shutdown().await;

    let alerts = notifier.alerts.lock().await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].ticker, "ACME");
    assert_eq!(alerts[0].source_titles, vec!["Acme beats".to_string()]);
    assert_eq!(alerts[0].reason, "high-priority source");

    let actions: Vec<AuditAction> = ledger
        .recent_audit(10)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert!(actions.contains(&AuditAction::IngestDocument));
    assert!(actions.contains(&AuditAction::CreateSignal));
    assert!(actions.contains(&AuditAction::SendAlert));
}

#[tokio::test]
async fn test_reprocessing_creates_no_duplicates() {
    let h = harness();
    let doc = acme_document();

    h.engine.process_document(doc.clone()).await.unwrap();
    let again = h.engine.process_document(doc).await.unwrap();
    assert_eq!(again, DocumentOutcome::Duplicate);

    let stats = h.ledger.stats().await.unwrap();
    assert_eq!(stats.total_signals, 1);
    assert_eq!(stats.total_evidence, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_processing_of_one_document() {
    let h = Arc::new(harness());
    let doc = acme_document();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let h = h.clone();
            let doc = doc.clone();
            tokio::spawn(async move { h.engine.process_document(doc).await.unwrap() })
        })
        .collect();

    let mut processed = 0;
    for task in tasks {
        if task.await.unwrap() != DocumentOutcome::Duplicate {
            processed += 1;
        }
    }
    assert_eq!(processed, 1);
    assert_eq!(h.ledger.stats().await.unwrap().total_signals, 1);
}

#[tokio::test]
async fn test_batch_isolates_failing_documents() {
    let h = harness_with(Arc::new(FlakyLedger::failing_on(EventCategory::GuidanceUp)));

    let mut failing = acme_document();
    failing.raw_text = "ACME raises guidance for the year".to_string();
    let mut second = acme_document();
    second.raw_text = "ACME announces share buyback".to_string();
    second.source = "reuters".to_string();

    let docs = vec![acme_document(), failing.clone(), second, acme_document()];
    let summary = h
        .engine
        .process_batch(docs, Arc::new(AtomicBool::new(false)))
        .await;

    assert_eq!(summary.total, 4);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.signals, 2);

    let hash = NormalizedDocument::compute_content_hash(&failing.raw_text);
    let audit = h
        .ledger
        .audit_for_target(TargetType::Document, &hash)
        .await
        .unwrap();
    let failures = audit
        .iter()
        .filter(|e| e.action == AuditAction::DocumentFailed)
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn test_retry_after_ledger_failure_recovers_signal() {
    let h = harness_with(Arc::new(FlakyLedger::failing_next(1)));
    let doc = acme_document();

    assert!(h.engine.process_document(doc.clone()).await.is_err());
    assert_eq!(h.ledger.stats().await.unwrap().total_signals, 0);

    let retry = h.engine.process_document(doc.clone()).await.unwrap();
    assert_eq!(
        retry,
        DocumentOutcome::Processed {
            events: 1,
            signals: 1,
            alerts: 1
        }
    );
    assert_eq!(h.engine.process_document(doc.clone()).await.unwrap(), DocumentOutcome::Duplicate);
    assert_eq!(h.ledger.stats().await.unwrap().total_signals, 1);

    let hash = doc.with_content_hash().content_hash;
    let ingests = h
        .ledger
        .audit_for_target(TargetType::Document, &hash)
        .await
        .unwrap()
        .iter()
        .filter(|e| e.action == AuditAction::IngestDocument)
        .count();
    assert_eq!(ingests, 1);
}

#[tokio::test]
async fn test_related_coverage_lowers_novelty_and_confirms_source() {
    let h = harness();
    let now = Utc::now();

    let mut first = acme_document();
    first.published_at = now - Duration::hours(2);
    first.source = "dj".to_string();
    first.title = Some("Acme tops forecasts".to_string());
    first.raw_text = "Acme (ACME) exceeds revenue forecasts".to_string();
    h.engine.process_document(first).await.unwrap();

    let mut follow_up = acme_document();
    follow_up.source = "nasdaq".to_string();
    h.engine.process_document(follow_up).await.unwrap();

    let signals = h.ledger.signals_for_ticker("ACME").await.unwrap();
    assert_eq!(signals.len(), 2);
    let latest = &signals[0];
    // Identical embedding to the earlier story
    assert!(latest.components.novelty < 0.1);
    assert!(latest.components.buzz_score > signals[1].components.buzz_score);
    assert_eq!(latest.alert_reason.as_deref(), Some("high-priority source"));

    let Harness { engine, notifier, .. } = h;
    engine.shutdown().await;
    let alerts = notifier.alerts.lock().await;
    let last = alerts.last().unwrap();
    assert_eq!(
        last.source_titles,
        vec!["Acme beats".to_string(), "Acme tops forecasts".to_string()]
    );
}

#[tokio::test]
async fn test_pattern_reload_applies_to_next_document() {
    let h = harness();

    let mut doc = acme_document();
    doc.raw_text = "ACME unveils quantum widget".to_string();
    doc.sentiment_score = 0.5;
    let before = h.engine.process_document(doc.clone()).await.unwrap();
    assert_eq!(
        before,
        DocumentOutcome::Processed {
            events: 0,
            signals: 0,
            alerts: 0
        }
    );

    h.engine
        .reload_patterns(&json!({"product_launch": ["unveils\\s+quantum"]}), "ops")
        .await
        .unwrap();

    doc.raw_text = "ACME unveils quantum gadget".to_string();
    let after = h.engine.process_document(doc).await.unwrap();
    assert_eq!(
        after,
        DocumentOutcome::Processed {
            events: 1,
            signals: 1,
            alerts: 1
        }
    );
}
