// Signal Fuser
// Combines source trust, novelty, event prior and buzz into a time-decayed,
// calibrated confidence, and decides direction, label and alerting.

use crate::calibration::{Calibrator, IdentityCalibrator};
use crate::config::{FuserConfig, FuserConfigStore};
use chrono::{DateTime, Utc};
use common::{
    clamp01, sigmoid, ActiveWeights, Direction, EventCategory, FusionComponents, SentimentLabel,
    SignalTrigger,
};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Inputs for one fusion
#[derive(Debug, Clone)]
pub struct FusionInput<'a> {
    pub source: &'a str,
    pub novelty: f64,
    /// `None` for sentiment-only signals
    pub event_type: Option<EventCategory>,
    pub buzz: f64,
    pub signal_time: DateTime<Utc>,
    pub eval_time: DateTime<Utc>,
    pub insider_contra: f64,
    pub model_uncertainty: f64,
}

/// Result of a fusion
#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    pub confidence: f64,
    pub base_score: f64,
    pub components: FusionComponents,
}

/// Why a signal alerts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertReason {
    HighPrioritySource,
    HighNovelty,
    ConfidenceThresholdMet,
    NeedsSecondSource,
}

impl AlertReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertReason::HighPrioritySource => "high-priority source",
            AlertReason::HighNovelty => "high novelty",
            AlertReason::ConfidenceThresholdMet => "confidence threshold met",
            AlertReason::NeedsSecondSource => "needs second source confirmation",
        }
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the alert policy; `None` means no alert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlertDecision {
    pub reason: Option<AlertReason>,
}

impl AlertDecision {
    pub fn should_alert(&self) -> bool {
        self.reason.is_some()
    }

    pub fn requires_second_source(&self) -> bool {
        self.reason == Some(AlertReason::NeedsSecondSource)
    }
}

/// Bullish / bearish / neutral call for a trigger
pub fn base_direction(trigger: SignalTrigger) -> Direction {
    match trigger.category() {
        Some(
            EventCategory::GuidanceUp
            | EventCategory::EarningsBeat
            | EventCategory::ProductLaunch
            | EventCategory::Buyback
            | EventCategory::Dividend,
        ) => Direction::Up,
        Some(EventCategory::GuidanceDown | EventCategory::EarningsMiss | EventCategory::Litigation) => {
            Direction::Down
        }
        Some(EventCategory::MergerAcquisition | EventCategory::ExecutiveChange) | None => {
            Direction::Neutral
        }
    }
}

/// Direction after strong sentiment is taken into account. Strong sentiment
/// can move a neutral call or reinforce a matching one, never flip it.
pub fn direction(
    trigger: SignalTrigger,
    sentiment: SentimentLabel,
    sentiment_score: f64,
    strong_threshold: f64,
) -> Direction {
    let base = base_direction(trigger);
    if sentiment_score > strong_threshold {
        match sentiment {
            SentimentLabel::Positive if base != Direction::Down => return Direction::Up,
            SentimentLabel::Negative if base != Direction::Up => return Direction::Down,
            _ => {}
        }
    }
    base
}

pub fn category_label(trigger: SignalTrigger) -> &'static str {
    match trigger.category() {
        Some(EventCategory::GuidanceUp) => "Guidance Raised",
        Some(EventCategory::GuidanceDown) => "Guidance Lowered",
        Some(EventCategory::EarningsBeat) => "Earnings Beat",
        Some(EventCategory::EarningsMiss) => "Earnings Miss",
        Some(EventCategory::MergerAcquisition) => "M&A Activity",
        Some(EventCategory::Litigation) => "Legal Risk",
        Some(EventCategory::ProductLaunch) => "Product Launch",
        Some(EventCategory::ExecutiveChange) => "Leadership Change",
        Some(EventCategory::Dividend) => "Dividend Update",
        Some(EventCategory::Buyback) => "Share Buyback",
        None => "Market Event",
    }
}

/// `"<category label> (<qualifier>)"`
pub fn label(trigger: SignalTrigger, confidence: f64) -> String {
    let qualifier = if confidence >= 0.8 {
        "High Confidence"
    } else if confidence >= 0.6 {
        "Moderate Confidence"
    } else {
        "Low Confidence"
    };
    format!("{} ({})", category_label(trigger), qualifier)
}

/// Multi-factor confidence fusion over the live [`FuserConfig`]
pub struct SignalFuser {
    config: Arc<FuserConfigStore>,
    calibrator: Arc<dyn Calibrator>,
}

impl SignalFuser {
    pub fn new(config: Arc<FuserConfigStore>) -> Self {
        Self {
            config,
            calibrator: Arc::new(IdentityCalibrator),
        }
    }

    pub fn with_calibrator(mut self, calibrator: Arc<dyn Calibrator>) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn config_store(&self) -> &Arc<FuserConfigStore> {
        &self.config
    }

    /// Snapshot of the live configuration; use one snapshot per signal
    pub fn config(&self) -> Arc<FuserConfig> {
        self.config.current()
    }

    pub fn fuse(&self, input: &FusionInput<'_>) -> Fusion {
        self.fuse_with(&self.config(), input)
    }

    /// Fuse against an explicit configuration snapshot
    pub fn fuse_with(&self, config: &FuserConfig, input: &FusionInput<'_>) -> Fusion {
        let w = &config.weights;

        let source_weight = clamp01(config.source_weight(input.source));
        let novelty = clamp01(input.novelty);
        let event_prior = clamp01(config.event_prior(input.event_type));
        let buzz_score = sigmoid(input.buzz);

        let base_score = (w.w_src * source_weight
            + w.w_novel * novelty
            + w.w_evt * event_prior
            + w.w_buzz * buzz_score)
            .max(0.0);

        let consistency_adj = w.k_cons * input.insider_contra;
        let uncertainty_adj = -w.k_unc * input.model_uncertainty;

        // Negative elapsed time yields a factor above 1 on purpose
        let elapsed = (input.eval_time - input.signal_time).num_milliseconds() as f64 / 1000.0;
        let time_decay = (-elapsed / w.tau).exp();

        let raw_score = clamp01((base_score + consistency_adj + uncertainty_adj) * time_decay);

        let confidence = if self.calibrator.is_fitted() {
            clamp01(self.calibrator.transform(raw_score))
        } else {
            raw_score
        };

        debug!(
            "Fused confidence {:.3} (base {:.3}, decay {:.3}) for source {} event {:?}",
            confidence, base_score, time_decay, input.source, input.event_type
        );

        Fusion {
            confidence,
            base_score,
            components: FusionComponents {
                source_weight,
                novelty,
                event_prior,
                buzz_score,
                base_score,
                consistency_adj,
                uncertainty_adj,
                time_decay,
                raw_score,
                weights: ActiveWeights {
                    w_src: w.w_src,
                    w_novel: w.w_novel,
                    w_evt: w.w_evt,
                    w_buzz: w.w_buzz,
                },
                history_degraded: false,
            },
        }
    }

    /// Alert policy, first matching rule wins
    pub fn should_alert(
        config: &FuserConfig,
        confidence: f64,
        source_weight: f64,
        novelty: f64,
        has_second_source: bool,
    ) -> AlertDecision {
        let t = &config.thresholds;
        let reason = if source_weight >= t.high_priority_source_weight {
            Some(AlertReason::HighPrioritySource)
        } else if novelty >= t.high_novelty {
            Some(AlertReason::HighNovelty)
        } else if confidence >= t.min_confidence {
            if has_second_source {
                Some(AlertReason::ConfidenceThresholdMet)
            } else {
                Some(AlertReason::NeedsSecondSource)
            }
        } else {
            None
        };
        AlertDecision { reason }
    }
}
