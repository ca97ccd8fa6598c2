use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Corporate-event categories the extractor can recognise.
///
/// The set is closed: adding a category means adding a variant here and
/// extending every exhaustive table that matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    GuidanceUp,
    GuidanceDown,
    EarningsBeat,
    EarningsMiss,
    #[serde(rename = "mna")]
    MergerAcquisition,
    Litigation,
    ProductLaunch,
    ExecutiveChange,
    Dividend,
    Buyback,
}

impl EventCategory {
    /// All categories in table order
    pub const ALL: [EventCategory; 10] = [
        EventCategory::GuidanceUp,
        EventCategory::GuidanceDown,
        EventCategory::EarningsBeat,
        EventCategory::EarningsMiss,
        EventCategory::MergerAcquisition,
        EventCategory::Litigation,
        EventCategory::ProductLaunch,
        EventCategory::ExecutiveChange,
        EventCategory::Dividend,
        EventCategory::Buyback,
    ];

    /// Wire key used in configuration files and evidence details
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::GuidanceUp => "guidance_up",
            EventCategory::GuidanceDown => "guidance_down",
            EventCategory::EarningsBeat => "earnings_beat",
            EventCategory::EarningsMiss => "earnings_miss",
            EventCategory::MergerAcquisition => "mna",
            EventCategory::Litigation => "litigation",
            EventCategory::ProductLaunch => "product_launch",
            EventCategory::ExecutiveChange => "executive_change",
            EventCategory::Dividend => "dividend",
            EventCategory::Buyback => "buyback",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a configuration key does not name a known category
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for EventCategory {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        EventCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == key)
            .ok_or(UnknownCategory(s.to_string()))
    }
}

/// Where in the text an event was matched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    pub matched_text: String,
    /// Up to 100 characters either side of the match
    pub context: String,
    /// Character offset of the match start
    pub match_offset: usize,
}

/// A corporate event found in one document. Never mutated after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEvent {
    pub id: Uuid,
    pub category: EventCategory,
    pub event_time: DateTime<Utc>,
    pub headline: String,
    /// Extraction confidence in [0, 1]
    pub confidence: f64,
    pub affected_ticker: Option<String>,
    pub payload: EventPayload,
}

/// What caused a signal: an extracted event, or a strongly-toned document
/// that produced no events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SignalTrigger {
    Event(EventCategory),
    Sentiment,
}

impl SignalTrigger {
    pub const SENTIMENT_KEY: &'static str = "sentiment_signal";

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalTrigger::Event(category) => category.as_str(),
            SignalTrigger::Sentiment => Self::SENTIMENT_KEY,
        }
    }

    pub fn category(&self) -> Option<EventCategory> {
        match self {
            SignalTrigger::Event(category) => Some(*category),
            SignalTrigger::Sentiment => None,
        }
    }
}

impl fmt::Display for SignalTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<SignalTrigger> for String {
    fn from(trigger: SignalTrigger) -> Self {
        trigger.as_str().to_string()
    }
}

impl TryFrom<String> for SignalTrigger {
    type Error = UnknownCategory;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value == Self::SENTIMENT_KEY {
            return Ok(SignalTrigger::Sentiment);
        }
        value.parse().map(SignalTrigger::Event)
    }
}
