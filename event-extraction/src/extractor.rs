use crate::patterns::{PatternRegistry, PatternSet};
use chrono::{DateTime, Utc};
use common::{clamp01, EventCategory, EventPayload, ExtractedEvent};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Characters of context kept either side of a match
pub const CONTEXT_RADIUS: usize = 100;
/// Matches of one category/ticker inside this many characters collapse into one event
pub const DEDUP_CHUNK: usize = 500;

const CONFIRMATION_BONUS: f64 = 0.05;
const HEDGING_PENALTY: f64 = 0.15;

lazy_static! {
    static ref CONFIRMATION_TERMS: Regex =
        Regex::new(r"(?i)\b(?:confirmed|announced|reported|reports)\b").unwrap();
    static ref HEDGING_TERMS: Regex =
        Regex::new(r"(?i)\b(?:rumou?rs?|speculation|possibly|may)\b").unwrap();
}

/// Extraction confidence before context adjustments
pub fn base_confidence(category: EventCategory) -> f64 {
    match category {
        EventCategory::GuidanceUp | EventCategory::GuidanceDown => 0.80,
        EventCategory::EarningsBeat | EventCategory::EarningsMiss => 0.85,
        EventCategory::MergerAcquisition => 0.90,
        EventCategory::Litigation => 0.75,
        EventCategory::ProductLaunch => 0.70,
        EventCategory::ExecutiveChange => 0.85,
        EventCategory::Dividend => 0.90,
        EventCategory::Buyback => 0.85,
    }
}

fn headline_template(category: EventCategory) -> &'static str {
    match category {
        EventCategory::GuidanceUp => "Raises Guidance",
        EventCategory::GuidanceDown => "Lowers Guidance",
        EventCategory::EarningsBeat => "Beats Earnings Estimates",
        EventCategory::EarningsMiss => "Misses Earnings Estimates",
        EventCategory::MergerAcquisition => "M&A Activity",
        EventCategory::Litigation => "Legal Proceedings",
        EventCategory::ProductLaunch => "Product Launch",
        EventCategory::ExecutiveChange => "Executive Change",
        EventCategory::Dividend => "Dividend Announcement",
        EventCategory::Buyback => "Share Buyback",
    }
}

pub fn headline(category: EventCategory, ticker: Option<&str>) -> String {
    match ticker {
        Some(t) => format!("{} {}", t, headline_template(category)),
        None => headline_template(category).to_string(),
    }
}

/// Context-adjusted extraction confidence
pub fn adjusted_confidence(category: EventCategory, context: &str) -> f64 {
    let mut confidence = base_confidence(category);
    if CONFIRMATION_TERMS.is_match(context) {
        confidence += CONFIRMATION_BONUS;
    }
    if HEDGING_TERMS.is_match(context) {
        confidence -= HEDGING_PENALTY;
    }
    clamp01(confidence)
}

struct Candidate<'t> {
    category: EventCategory,
    byte_start: usize,
    byte_end: usize,
    matched: &'t str,
}

/// Pattern-based corporate event extractor
pub struct EventExtractor {
    registry: Arc<PatternRegistry>,
}

impl EventExtractor {
    pub fn new(registry: Arc<PatternRegistry>) -> Self {
        Self { registry }
    }

    pub fn with_default_patterns() -> Self {
        Self::new(Arc::new(PatternRegistry::new()))
    }

    pub fn registry(&self) -> &Arc<PatternRegistry> {
        &self.registry
    }

    /// Extract events from `text`, in text order.
    ///
    /// The live pattern set is snapshotted once, so a concurrent reload
    /// affects the next call, never this one.
    pub fn extract_events(
        &self,
        text: &str,
        document_time: DateTime<Utc>,
        known_tickers: &[String],
    ) -> Vec<ExtractedEvent> {
        let patterns = self.registry.current();
        extract_with(&patterns, text, document_time, known_tickers)
    }
}

impl Default for EventExtractor {
    fn default() -> Self {
        Self::with_default_patterns()
    }
}

fn extract_with(
    patterns: &PatternSet,
    text: &str,
    document_time: DateTime<Utc>,
    known_tickers: &[String],
) -> Vec<ExtractedEvent> {
    let mut candidates: Vec<Candidate> = Vec::new();
    for (category, regex) in patterns.iter() {
        for m in regex.find_iter(text) {
            candidates.push(Candidate {
                category,
                byte_start: m.start(),
                byte_end: m.end(),
                matched: m.as_str(),
            });
        }
    }
    if candidates.is_empty() {
        return Vec::new();
    }

    // Stable: equal offsets keep category order, then pattern order
    candidates.sort_by_key(|c| c.byte_start);

    // Byte position of every char boundary, plus the end of the text
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = boundaries.len() - 1;
    let to_char = |byte: usize| boundaries.partition_point(|&b| b < byte);

    let tickers: Vec<(String, &str)> = known_tickers
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| (t.to_uppercase(), t))
        .collect();

    let mut seen: HashSet<(EventCategory, Option<String>, usize)> = HashSet::new();
    let mut events = Vec::new();

    for candidate in candidates {
        let start_char = to_char(candidate.byte_start);
        let end_char = to_char(candidate.byte_end);
        let ctx_start = boundaries[start_char.saturating_sub(CONTEXT_RADIUS)];
        let ctx_end = boundaries[(end_char + CONTEXT_RADIUS).min(char_count)];
        let context = &text[ctx_start..ctx_end];

        let upper_context = context.to_uppercase();
        let affected_ticker = tickers
            .iter()
            .find(|(upper, _)| upper_context.contains(upper.as_str()))
            .map(|(upper, _)| upper.clone());

        let key = (
            candidate.category,
            affected_ticker.clone(),
            start_char / DEDUP_CHUNK,
        );
        if !seen.insert(key) {
            debug!(
                "Dropping duplicate {} match at offset {}",
                candidate.category, start_char
            );
            continue;
        }

        events.push(ExtractedEvent {
            id: Uuid::new_v4(),
            category: candidate.category,
            event_time: document_time,
            headline: headline(candidate.category, affected_ticker.as_deref()),
            confidence: adjusted_confidence(candidate.category, context),
            affected_ticker,
            payload: EventPayload {
                matched_text: candidate.matched.to_string(),
                context: context.to_string(),
                match_offset: start_char,
            },
        });
    }

    events
}
