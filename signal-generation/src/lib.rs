// Signal Generation Engine
// Turns normalized news documents into scored, explainable trading signals

pub mod calibration;
pub mod config;
pub mod fuser;
pub mod history;
pub mod ledger;
pub mod notifier;
pub mod novelty;
pub mod pipeline;
pub mod settings;

pub use calibration::{Calibrator, IdentityCalibrator};
pub use config::{AlertThresholds, FuserConfig, FuserConfigStore, FusionWeights};
pub use fuser::{AlertDecision, AlertReason, Fusion, FusionInput, SignalFuser};
pub use history::{DocumentHistory, HistoricalDocument, HistoryWindow, InMemoryDocumentStore};
pub use ledger::{EvidenceLedger, InMemoryLedger, LedgerStats, RecordOutcome, SignalKey};
pub use notifier::{AlertDispatcher, AlertNotifier, AlertPayload, WebhookNotifier};
pub use novelty::{NoveltyCalculator, WindowStats};
pub use pipeline::{BatchSummary, DocumentOutcome, EngineOptions, SignalEngine};
pub use settings::{load_settings, save_settings, EngineSettings, NoveltySettings, ThresholdSettings};
