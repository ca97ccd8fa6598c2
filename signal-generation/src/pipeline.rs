// Signal Engine
// Per-document pipeline: extract events, score each (ticker, trigger) pair,
// record signal and evidence, hand alerts to the dispatcher

use crate::config::{AlertThresholds, FuserConfig, FuserConfigStore};
use crate::fuser::{self, FusionInput, SignalFuser};
use crate::history::{DocumentHistory, InMemoryDocumentStore};
use crate::ledger::{
    create_signal_audit, document_evidence, event_evidence, EvidenceLedger, InMemoryLedger,
    RecordOutcome, SignalKey,
};
use crate::notifier::{AlertDispatcher, AlertPayload, WebhookNotifier};
use crate::novelty::NoveltyCalculator;
use crate::settings::EngineSettings;
use anyhow::Result;
use chrono::Utc;
use common::{
    AuditAction, AuditEntry, ExtractedEvent, NormalizedDocument, ReloadError, Signal,
    SignalTrigger, TargetType,
};
use event_extraction::{EventExtractor, PatternRegistry, PatternSet};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const ENGINE_ACTOR: &str = "signal-engine";

/// What processing one document produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// The content hash was already ingested; nothing was written
    Duplicate,
    Processed {
        events: usize,
        signals: usize,
        alerts: usize,
    },
}

/// Totals for a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total: usize,
    pub processed: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Documents not started because the run was cancelled
    pub cancelled: usize,
    pub events: usize,
    pub signals: usize,
    pub alerts: usize,
}

/// One (ticker, trigger) pair to score
struct Candidate<'a> {
    ticker: String,
    trigger: SignalTrigger,
    event: Option<&'a ExtractedEvent>,
}

/// Engine tuning that is not part of the hot-reloadable fuser configuration
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub strong_sentiment_threshold: f64,
    pub max_concurrent_documents: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        let settings = EngineSettings::default();
        Self::from(&settings)
    }
}

impl From<&EngineSettings> for EngineOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            strong_sentiment_threshold: settings.strong_sentiment_threshold,
            max_concurrent_documents: settings.max_concurrent_documents,
        }
    }
}

/// The news-to-signal engine. Every collaborator is injected.
pub struct SignalEngine {
    extractor: EventExtractor,
    calculator: NoveltyCalculator,
    fuser: SignalFuser,
    history: Arc<dyn DocumentHistory>,
    ledger: Arc<dyn EvidenceLedger>,
    dispatcher: Option<AlertDispatcher>,
    options: EngineOptions,
}

impl SignalEngine {
    pub fn new(
        extractor: EventExtractor,
        calculator: NoveltyCalculator,
        fuser: SignalFuser,
        history: Arc<dyn DocumentHistory>,
        ledger: Arc<dyn EvidenceLedger>,
    ) -> Self {
        Self {
            extractor,
            calculator,
            fuser,
            history,
            ledger,
            dispatcher: None,
            options: EngineOptions::default(),
        }
    }

    /// Set the alert dispatcher; without one, alert decisions are only recorded
    pub fn with_dispatcher(mut self, dispatcher: AlertDispatcher) -> Self {
        info!("Alert dispatch enabled");
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// In-memory engine wired from settings: persisted patterns and fuser
    /// configuration, webhook notifier. Must be called inside a tokio runtime.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self> {
        let registry = Arc::new(PatternRegistry::load_or_default(&settings.patterns_path));
        let config = Arc::new(FuserConfigStore::load_or_default(
            &settings.fuser_config_path,
            AlertThresholds::from(&settings.thresholds),
        ));
        let history: Arc<dyn DocumentHistory> = Arc::new(InMemoryDocumentStore::new());
        let ledger: Arc<dyn EvidenceLedger> = Arc::new(InMemoryLedger::new());

        let notifier = Arc::new(WebhookNotifier::new(settings.webhook_url.clone())?);
        if !notifier.is_configured() {
            info!("No webhook configured, alerts will be logged only");
        }
        let dispatcher =
            AlertDispatcher::spawn(notifier, ledger.clone(), settings.alert_queue_capacity);

        Ok(Self::new(
            EventExtractor::new(registry),
            NoveltyCalculator::new(history.clone(), settings.novelty.clone()),
            SignalFuser::new(config),
            history,
            ledger,
        )
        .with_dispatcher(dispatcher)
        .with_options(EngineOptions::from(settings)))
    }

    pub fn ledger(&self) -> &Arc<dyn EvidenceLedger> {
        &self.ledger
    }

    pub fn history(&self) -> &Arc<dyn DocumentHistory> {
        &self.history
    }

    pub fn extractor(&self) -> &EventExtractor {
        &self.extractor
    }

    pub fn fuser(&self) -> &SignalFuser {
        &self.fuser
    }

    /// Run one document through the whole pipeline.
    ///
    /// The history store only records that a document was seen; the ledger
    /// key decides whether a signal already exists. A document whose earlier
    /// run failed halfway is therefore scored again and its missing signals
    /// are recorded, while signals that made it are not duplicated.
    pub async fn process_document(&self, doc: NormalizedDocument) -> Result<DocumentOutcome> {
        let doc = doc.with_content_hash();

        let first_seen = match self.history.insert(&doc).await {
            Ok(inserted) => inserted,
            Err(e) => {
                warn!(
                    "History insert failed for {}, scoring without it: {:#}",
                    doc.content_hash, e
                );
                true
            }
        };
        if first_seen {
            self.audit_ingest(&doc).await?;
        }

        let events = self
            .extractor
            .extract_events(&doc.raw_text, doc.published_at, &doc.tickers);
        let candidates = self.candidates(&doc, &events);

        let mut signals = 0;
        let mut already_recorded = 0;
        let mut alerts = 0;
        for candidate in candidates {
            match self.score_candidate(&doc, candidate).await? {
                Some(alerted) => {
                    signals += 1;
                    alerts += alerted as usize;
                }
                None => already_recorded += 1,
            }
        }

        if signals == 0 && (already_recorded > 0 || !first_seen) {
            debug!("Skipping duplicate document {}", doc.content_hash);
            return Ok(DocumentOutcome::Duplicate);
        }
        if !first_seen && !self.ingest_audited(&doc.content_hash).await? {
            self.audit_ingest(&doc).await?;
        }

        info!(
            "Processed document {}: {} events, {} signals, {} alerts",
            doc.content_hash,
            events.len(),
            signals,
            alerts
        );
        Ok(DocumentOutcome::Processed {
            events: events.len(),
            signals,
            alerts,
        })
    }

    async fn audit_ingest(&self, doc: &NormalizedDocument) -> Result<()> {
        self.ledger
            .append_audit(AuditEntry::new(
                ENGINE_ACTOR,
                AuditAction::IngestDocument,
                TargetType::Document,
                doc.content_hash.clone(),
                json!({
                    "source": doc.source,
                    "title": doc.title,
                    "published_at": doc.published_at,
                    "tickers": doc.tickers,
                }),
            ))
            .await
    }

    async fn ingest_audited(&self, content_hash: &str) -> Result<bool> {
        Ok(self
            .ledger
            .audit_for_target(TargetType::Document, content_hash)
            .await?
            .iter()
            .any(|e| e.action == AuditAction::IngestDocument))
    }

    /// Events with a ticker become candidates; a document without events
    /// but with strong sentiment yields one sentiment candidate per ticker
    fn candidates<'a>(
        &self,
        doc: &NormalizedDocument,
        events: &'a [ExtractedEvent],
    ) -> Vec<Candidate<'a>> {
        if events.is_empty() {
            if doc.sentiment_score > self.options.strong_sentiment_threshold {
                return doc
                    .tickers
                    .iter()
                    .map(|t| Candidate {
                        ticker: t.to_uppercase(),
                        trigger: SignalTrigger::Sentiment,
                        event: None,
                    })
                    .collect();
            }
            return Vec::new();
        }

        events
            .iter()
            .filter_map(|event| match &event.affected_ticker {
                Some(ticker) => Some(Candidate {
                    ticker: ticker.clone(),
                    trigger: SignalTrigger::Event(event.category),
                    event: Some(event),
                }),
                None => {
                    debug!("Skipping {} event without a ticker", event.category);
                    None
                }
            })
            .collect()
    }

    /// Score, record and maybe alert one candidate. `None` when the signal
    /// was already in the ledger, otherwise whether an alert was queued.
    async fn score_candidate(
        &self,
        doc: &NormalizedDocument,
        candidate: Candidate<'_>,
    ) -> Result<Option<bool>> {
        let stats = self.calculator.assess(doc, &candidate.ticker).await;

        // One snapshot for fusion and the alert policy
        let config: Arc<FuserConfig> = self.fuser.config();
        let mut fusion = self.fuser.fuse_with(
            &config,
            &FusionInput {
                source: &doc.source,
                novelty: stats.novelty,
                event_type: candidate.trigger.category(),
                buzz: stats.buzz,
                signal_time: doc.published_at,
                eval_time: Utc::now(),
                insider_contra: 0.0,
                model_uncertainty: 0.0,
            },
        );
        fusion.components.history_degraded = stats.degraded;

        let direction = fuser::direction(
            candidate.trigger,
            doc.sentiment,
            doc.sentiment_score,
            self.options.strong_sentiment_threshold,
        );
        let decision = SignalFuser::should_alert(
            &config,
            fusion.confidence,
            fusion.components.source_weight,
            fusion.components.novelty,
            stats.has_second_source,
        );

        let signal = Signal {
            id: Uuid::new_v4(),
            ticker: candidate.ticker.clone(),
            signal_time: doc.published_at,
            base_score: fusion.base_score,
            confidence: fusion.confidence,
            direction,
            label: fuser::label(candidate.trigger, fusion.confidence),
            decay_seconds: config.weights.tau.round() as i64,
            trigger: candidate.trigger,
            document_hash: doc.content_hash.clone(),
            components: fusion.components,
            alert_reason: decision.reason.map(|r| r.to_string()),
            requires_second_source: decision.requires_second_source(),
            created_at: Utc::now(),
        };

        let mut evidence = vec![document_evidence(signal.id, doc, stats.novelty)];
        let key = match candidate.event {
            Some(event) => {
                evidence.push(event_evidence(signal.id, event));
                SignalKey::for_event(&doc.content_hash, &candidate.ticker, event)
            }
            None => SignalKey::for_sentiment(&doc.content_hash, &candidate.ticker),
        };

        let outcome = self
            .ledger
            .record_signal(&key, &signal, &evidence, create_signal_audit(ENGINE_ACTOR, &signal))
            .await?;
        if outcome == RecordOutcome::Duplicate {
            debug!("Signal for {:?} already recorded", key);
            return Ok(None);
        }

        if !decision.should_alert() {
            return Ok(Some(false));
        }

        let alerted = match &self.dispatcher {
            Some(dispatcher) => {
                let mut titles = vec![doc.display_title().to_string()];
                titles.extend(stats.related_titles);
                dispatcher.dispatch(AlertPayload::new(&signal, titles)).await
            }
            None => false,
        };
        Ok(Some(alerted))
    }

    /// Process documents concurrently, at most `max_concurrent_documents`
    /// at a time. `cancel` is checked before each document starts; work
    /// already committed stands. One document failing never stops the run.
    pub async fn process_batch(
        &self,
        docs: Vec<NormalizedDocument>,
        cancel: Arc<AtomicBool>,
    ) -> BatchSummary {
        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrent_documents.max(1)));
        let total = docs.len();

        let runs = docs.into_iter().map(|doc| {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                if cancel.load(Ordering::SeqCst) {
                    return None;
                }
                let doc = doc.with_content_hash();
                let hash = doc.content_hash.clone();
                let outcome = self.process_document(doc).await;
                if let Err(e) = &outcome {
                    self.record_failure(&hash, e).await;
                }
                Some(outcome)
            }
        });

        let mut summary = BatchSummary {
            total,
            ..Default::default()
        };
        for result in join_all(runs).await {
            match result {
                None => summary.cancelled += 1,
                Some(Ok(DocumentOutcome::Duplicate)) => summary.duplicates += 1,
                Some(Ok(DocumentOutcome::Processed {
                    events,
                    signals,
                    alerts,
                })) => {
                    summary.processed += 1;
                    summary.events += events;
                    summary.signals += signals;
                    summary.alerts += alerts;
                }
                Some(Err(_)) => summary.failed += 1,
            }
        }

        info!(
            "Batch finished: {} processed, {} duplicates, {} failed, {} cancelled, {} signals, {} alerts",
            summary.processed,
            summary.duplicates,
            summary.failed,
            summary.cancelled,
            summary.signals,
            summary.alerts
        );
        summary
    }

    async fn record_failure(&self, content_hash: &str, e: &anyhow::Error) {
        error!("Failed to process document {}: {:#}", content_hash, e);
        let entry = AuditEntry::new(
            ENGINE_ACTOR,
            AuditAction::DocumentFailed,
            TargetType::Document,
            content_hash,
            json!({"error": format!("{:#}", e)}),
        );
        if let Err(e) = self.ledger.append_audit(entry).await {
            warn!("Failed to audit document failure: {}", e);
        }
    }

    /// Replace the fuser configuration and audit the outcome
    pub async fn reload_fuser_config(
        &self,
        raw: &serde_json::Value,
        actor: &str,
    ) -> Result<Arc<FuserConfig>, ReloadError> {
        let result = self.fuser.config_store().reload(raw);
        let entry = match &result {
            Ok(config) => AuditEntry::new(
                actor,
                AuditAction::ReloadConfig,
                TargetType::FuserConfig,
                "fuser_settings",
                config.to_json(),
            ),
            Err(e) => rejection_audit(actor, TargetType::FuserConfig, "fuser_settings", e),
        };
        self.append_reload_audit(entry).await;
        result
    }

    /// Replace the event pattern set and audit the outcome
    pub async fn reload_patterns(
        &self,
        raw: &serde_json::Value,
        actor: &str,
    ) -> Result<Arc<PatternSet>, ReloadError> {
        let result = self.extractor.registry().reload(raw);
        let entry = match &result {
            Ok(set) => AuditEntry::new(
                actor,
                AuditAction::ReloadPatterns,
                TargetType::EventPatterns,
                "event_patterns",
                json!({"pattern_count": set.pattern_count()}),
            ),
            Err(e) => rejection_audit(actor, TargetType::EventPatterns, "event_patterns", e),
        };
        self.append_reload_audit(entry).await;
        result
    }

    async fn append_reload_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.ledger.append_audit(entry).await {
            warn!("Failed to audit reload: {}", e);
        }
    }

    /// Stop alert dispatch, waiting for queued alerts
    pub async fn shutdown(self) {
        if let Some(dispatcher) = self.dispatcher {
            dispatcher.shutdown().await;
        }
    }
}

fn rejection_audit(actor: &str, target: TargetType, target_id: &str, e: &ReloadError) -> AuditEntry {
    let payload = match e.validation_errors() {
        Some(errors) => json!(errors),
        None => json!({"error": e.to_string()}),
    };
    AuditEntry::new(actor, AuditAction::ReloadRejected, target, target_id, payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{HistoricalDocument, HistoryWindow};
    use crate::settings::NoveltySettings;
    use chrono::{DateTime, Duration};
    use common::SentimentLabel;

    struct UnreachableHistory;

    #[async_trait::async_trait]
    impl DocumentHistory for UnreachableHistory {
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

    fn engine() -> SignalEngine {
        let history: Arc<dyn DocumentHistory> = Arc::new(InMemoryDocumentStore::new());
        SignalEngine::new(
            EventExtractor::with_default_patterns(),
            NoveltyCalculator::new(history.clone(), NoveltySettings::default()),
            SignalFuser::new(Arc::new(FuserConfigStore::default())),
            history,
            Arc::new(InMemoryLedger::new()),
        )
    }

    fn doc(text: &str, source: &str, sentiment: SentimentLabel, score: f64, at: DateTime<Utc>) -> NormalizedDocument {
        NormalizedDocument {
            content_hash: String::new(),
            published_at: at,
            source: source.to_string(),
            title: Some(text.to_string()),
            url: None,
            raw_text: text.to_string(),
            sentiment,
            sentiment_score: score,
            embedding: Some(vec![0.3, 0.7, 0.1]),
            tickers: vec!["ACME".to_string()],
        }
    }

    #[tokio::test]
    async fn test_sentiment_only_document_yields_signal() {
        let engine = engine();
        let d = doc("Investors cheer Acme", "dj", SentimentLabel::Positive, 0.9, Utc::now());
        let outcome = engine.process_document(d).await.unwrap();
        assert_eq!(
            outcome,
            DocumentOutcome::Processed {
                events: 0,
                signals: 1,
                alerts: 0
            }
        );

        let signals = engine.ledger().signals_for_ticker("ACME").await.unwrap();
        assert_eq!(signals[0].trigger, SignalTrigger::Sentiment);
        assert_eq!(signals[0].direction, common::Direction::Up);
        assert!(signals[0].label.starts_with("Market Event"));

        let evidence = engine.ledger().evidence_for(signals[0].id).await.unwrap();
        assert_eq!(evidence.len(), 1);
    }

    #[tokio::test]
    async fn test_weak_sentiment_without_events_yields_nothing() {
        let engine = engine();
        let d = doc("Acme holds meeting", "dj", SentimentLabel::Positive, 0.6, Utc::now());
        let outcome = engine.process_document(d).await.unwrap();
        assert_eq!(
            outcome,
            DocumentOutcome::Processed {
                events: 0,
                signals: 0,
                alerts: 0
            }
        );
    }

    #[tokio::test]
    async fn test_event_signal_carries_event_evidence() {
        let engine = engine();
        let d = doc(
            "ACME faces class action lawsuit",
            "reuters",
            SentimentLabel::Negative,
            0.7,
            Utc::now() - Duration::hours(1),
        );
        engine.process_document(d).await.unwrap();

        let signals = engine.ledger().signals_for_ticker("ACME").await.unwrap();
        assert_eq!(signals.len(), 1);
        let s = &signals[0];
        assert_eq!(s.direction, common::Direction::Down);
        assert_eq!(s.decay_seconds, 86_400);
        assert!(s.components.time_decay < 1.0);

        let evidence = engine.ledger().evidence_for(s.id).await.unwrap();
        assert_eq!(evidence.len(), 2);
        let event_row = evidence
            .iter()
            .find(|e| e.kind == common::EvidenceKind::Event)
            .unwrap();
        assert!((event_row.weight - 0.75).abs() < 1e-9);
        assert_eq!(event_row.details["category"], "litigation");
    }

    #[tokio::test]
    async fn test_duplicate_document_is_skipped() {
        let engine = engine();
        let d = doc("ACME raises guidance", "wsj", SentimentLabel::Positive, 0.7, Utc::now());
        engine.process_document(d.clone()).await.unwrap();
        assert_eq!(engine.process_document(d).await.unwrap(), DocumentOutcome::Duplicate);
        assert_eq!(engine.ledger().stats().await.unwrap().total_signals, 1);
    }

    #[tokio::test]
    async fn test_unreachable_history_degrades_instead_of_failing() {
        let history: Arc<dyn DocumentHistory> = Arc::new(UnreachableHistory);
        let engine = SignalEngine::new(
            EventExtractor::with_default_patterns(),
            NoveltyCalculator::new(history.clone(), NoveltySettings::default()),
            SignalFuser::new(Arc::new(FuserConfigStore::default())),
            history,
            Arc::new(InMemoryLedger::new()),
        );
        let d = doc(
            "Acme Corp (ACME) beats earnings estimates",
            "bloomberg",
            SentimentLabel::Positive,
            0.9,
            Utc::now(),
        );

        let outcome = engine.process_document(d.clone()).await.unwrap();
        assert_eq!(
            outcome,
            DocumentOutcome::Processed {
                events: 1,
                signals: 1,
                alerts: 0
            }
        );

        let signals = engine.ledger().signals_for_ticker("ACME").await.unwrap();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].components.history_degraded);
        assert_eq!(signals[0].components.novelty, 1.0);
        assert!((signals[0].components.buzz_score - common::sigmoid(0.5)).abs() < 1e-9);

        // The ledger key still prevents a second signal
        assert_eq!(engine.process_document(d).await.unwrap(), DocumentOutcome::Duplicate);
        assert_eq!(engine.ledger().stats().await.unwrap().total_signals, 1);
    }

    #[tokio::test]
    async fn test_cancelled_batch_starts_nothing() {
        let engine = engine();
        let docs = vec![
            doc("ACME raises guidance", "wsj", SentimentLabel::Positive, 0.7, Utc::now()),
            doc("ACME beats estimates", "wsj", SentimentLabel::Positive, 0.7, Utc::now()),
        ];
        let summary = engine.process_batch(docs, Arc::new(AtomicBool::new(true))).await;
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.processed, 0);
        assert_eq!(engine.ledger().stats().await.unwrap().total_signals, 0);
    }

    #[tokio::test]
    async fn test_reloads_are_audited() {
        let engine = engine();
        let rejected = engine
            .reload_patterns(&json!({"dividend": ["(bad"]}), "admin")
            .await;
        assert!(rejected.is_err());
        engine
            .reload_fuser_config(
                &json!({"weights": {
                    "W_SRC": 0.4, "W_NOVEL": 0.2, "W_EVT": 0.3, "W_BUZZ": 0.1,
                    "K_CONS": 0.1, "K_UNC": 0.15, "TAU": 3600
                }}),
                "admin",
            )
            .await
            .unwrap();
        assert_eq!(engine.fuser().config().weights.tau, 3600.0);

        let patterns = engine
            .ledger()
            .audit_for_target(TargetType::EventPatterns, "event_patterns")
            .await
            .unwrap();
        assert_eq!(patterns[0].action, AuditAction::ReloadRejected);
        assert!(patterns[0].payload["validation_errors"]["dividend"].is_array());

        let config = engine
            .ledger()
            .audit_for_target(TargetType::FuserConfig, "fuser_settings")
            .await
            .unwrap();
        assert_eq!(config[0].action, AuditAction::ReloadConfig);
        assert_eq!(config[0].actor, "admin");
    }
}
