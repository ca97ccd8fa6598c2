//! Event pattern set and its hot-reload registry
//!
//! A pattern set maps each event category to a list of case-insensitive
//! regular expressions. The live set is an immutable value behind an
//! `Arc`; a reload validates a complete replacement, persists it, and then
//! swaps the pointer. Readers holding the old `Arc` finish their pass on the
//! old set, so no extraction ever sees a mix of two sets.

use common::persist::{read_json_file, write_json_atomic};
use common::{EventCategory, ReloadError, ValidationErrors};
use lazy_static::lazy_static;
use parking_lot::{Mutex, RwLock};
use regex::{Regex, RegexBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Category -> raw pattern strings, in category order
pub type PatternDefinitions = BTreeMap<EventCategory, Vec<String>>;

/// Built-in patterns used when nothing has been persisted
pub fn default_definitions() -> PatternDefinitions {
    let table: [(EventCategory, &[&str]); 10] = [
        (
            EventCategory::GuidanceUp,
            &[
                r"raises?\s+(?:full[- ]?year\s+)?guidance",
                r"increases?\s+(?:revenue\s+)?outlook",
                r"upgrades?\s+(?:earnings\s+)?forecast",
                r"boosts?\s+(?:profit\s+)?guidance",
                r"lifts?\s+(?:sales\s+)?expectations",
            ],
        ),
        (
            EventCategory::GuidanceDown,
            &[
                r"lowers?\s+(?:full[- ]?year\s+)?guidance",
                r"cuts?\s+(?:revenue\s+)?outlook",
                r"reduces?\s+(?:earnings\s+)?forecast",
                r"slashes?\s+(?:profit\s+)?guidance",
                r"downgrades?\s+expectations",
            ],
        ),
        (
            EventCategory::EarningsBeat,
            &[
                r"beats?\s+(?:earnings\s+)?estimates?",
                r"tops?\s+(?:profit\s+)?expectations?",
                r"exceeds?\s+(?:revenue\s+)?forecasts?",
                r"surpasses?\s+(?:wall\s+street\s+)?estimates?",
                r"stronger[- ]than[- ]expected\s+(?:earnings|results)",
            ],
        ),
        (
            EventCategory::EarningsMiss,
            &[
                r"misses?\s+(?:earnings\s+)?estimates?",
                r"falls?\s+short\s+of\s+expectations?",
                r"disappoints?\s+(?:on\s+)?(?:earnings|revenue)",
                r"below\s+(?:wall\s+street\s+)?estimates?",
                r"weaker[- ]than[- ]expected\s+(?:earnings|results)",
            ],
        ),
        (
            EventCategory::MergerAcquisition,
            &[
                r"acquires?\s+",
                r"to\s+acquire\s+",
                r"merger\s+(?:with|agreement)",
                r"takeover\s+(?:bid|offer)",
                r"agrees?\s+to\s+(?:buy|purchase|merge)",
                r"completes?\s+(?:acquisition|merger)",
                r"announces?\s+(?:acquisition|merger)",
            ],
        ),
        (
            EventCategory::Litigation,
            &[
                r"lawsuit\s+(?:filed|against)",
                r"sued\s+(?:by|for)",
                r"legal\s+(?:action|proceedings?)",
                r"regulatory\s+(?:probe|investigation)",
                r"(?:SEC|DOJ|FTC)\s+(?:investigat|prob|inquir)",
                r"settles?\s+(?:lawsuit|charges?)",
                r"class[- ]action\s+(?:lawsuit|suit)",
            ],
        ),
        (
            EventCategory::ProductLaunch,
            &[
                r"launches?\s+(?:new\s+)?product",
                r"unveils?\s+(?:new\s+)?(?:product|service)",
                r"introduces?\s+(?:new\s+)?(?:product|offering)",
                r"debuts?\s+(?:new\s+)?(?:product|platform)",
                r"announces?\s+(?:new\s+)?(?:product|service)\s+launch",
            ],
        ),
        (
            EventCategory::ExecutiveChange,
            &[
                r"(?:CEO|CFO|CTO|COO)\s+(?:resigns?|departs?|steps?\s+down)",
                r"appoints?\s+(?:new\s+)?(?:CEO|CFO|CTO|COO)",
                r"names?\s+(?:new\s+)?(?:chief|president)",
                r"(?:executive|leadership)\s+(?:change|transition)",
                r"replaces?\s+(?:CEO|CFO|CTO|COO)",
            ],
        ),
        (
            EventCategory::Dividend,
            &[
                r"declares?\s+(?:quarterly\s+)?dividend",
                r"announces?\s+(?:dividend|distribution)",
                r"increases?\s+dividend",
                r"cuts?\s+dividend",
                r"suspends?\s+dividend",
                r"dividend\s+(?:payment|declaration)",
            ],
        ),
        (
            EventCategory::Buyback,
            &[
                r"share\s+(?:buyback|repurchase)",
                r"stock\s+(?:buyback|repurchase)",
                r"authorizes?\s+(?:\$[\d.]+[BMK]?\s+)?(?:buyback|repurchase)",
                r"announces?\s+(?:\$[\d.]+[BMK]?\s+)?(?:buyback|repurchase)",
                r"expands?\s+(?:buyback|repurchase)\s+program",
            ],
        ),
    ];

    table
        .into_iter()
        .map(|(category, patterns)| {
            (category, patterns.iter().map(|p| p.to_string()).collect())
        })
        .collect()
}

lazy_static! {
    static ref DEFAULT_SET: Arc<PatternSet> = Arc::new(
        PatternSet::compile(default_definitions()).expect("built-in event patterns compile")
    );
}

/// A validated, compiled pattern set. Immutable once built.
#[derive(Debug)]
pub struct PatternSet {
    definitions: PatternDefinitions,
    compiled: Vec<(EventCategory, Vec<Regex>)>,
}

impl PatternSet {
    /// The built-in set
    pub fn defaults() -> Arc<PatternSet> {
        DEFAULT_SET.clone()
    }

    /// Compile every pattern; any failure rejects the whole set
    pub fn compile(definitions: PatternDefinitions) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let mut compiled = Vec::with_capacity(definitions.len());

        for (category, patterns) in &definitions {
            let mut regexes = Vec::with_capacity(patterns.len());
            for (index, pattern) in patterns.iter().enumerate() {
                if pattern.trim().is_empty() {
                    errors.push(category.as_str(), format!("pattern {}: empty pattern", index));
                    continue;
                }
                match RegexBuilder::new(pattern).case_insensitive(true).build() {
                    Ok(regex) => regexes.push(regex),
                    Err(e) => errors.push(
                        category.as_str(),
                        format!("pattern {} `{}`: {}", index, pattern, e),
                    ),
                }
            }
            compiled.push((*category, regexes));
        }

        errors.into_result(Self { definitions, compiled })
    }

    /// Validate a raw `{category: [pattern, ...]}` document and compile it.
    ///
    /// Shape problems (unknown category, non-list value, non-string entry)
    /// and compile failures are all reported together, keyed by category.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let Some(object) = raw.as_object() else {
            errors.push(
                "patterns",
                "payload must be an object mapping event categories to pattern lists",
            );
            return Err(errors);
        };

        let mut definitions = PatternDefinitions::new();
        for (key, value) in object {
            let category = match key.parse::<EventCategory>() {
                Ok(category) => category,
                Err(e) => {
                    errors.push(key.as_str(), e.to_string());
                    continue;
                }
            };
            let Some(items) = value.as_array() else {
                errors.push(key.as_str(), format!("patterns for {} must be a list", key));
                continue;
            };
            let mut patterns = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(p) => patterns.push(p.to_string()),
                    None => errors.push(
                        key.as_str(),
                        format!("pattern {}: empty or non-string pattern", index),
                    ),
                }
            }
            if definitions.insert(category, patterns).is_some() {
                errors.push(key.as_str(), "category listed more than once");
            }
        }

        match Self::compile(definitions) {
            Ok(set) => errors.into_result(set),
            Err(compile_errors) => {
                for (key, messages) in compile_errors.validation_errors {
                    for message in messages {
                        errors.push(key.clone(), message);
                    }
                }
                Err(errors)
            }
        }
    }

    pub fn definitions(&self) -> &PatternDefinitions {
        &self.definitions
    }

    /// `{category: [pattern, ...]}` as persisted
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .definitions
            .iter()
            .map(|(category, patterns)| (category.as_str().to_string(), serde_json::json!(patterns)))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Compiled patterns in category order, then pattern order
    pub fn iter(&self) -> impl Iterator<Item = (EventCategory, &Regex)> + '_ {
        self.compiled
            .iter()
            .flat_map(|(category, regexes)| regexes.iter().map(move |r| (*category, r)))
    }

    pub fn pattern_count(&self) -> usize {
        self.compiled.iter().map(|(_, r)| r.len()).sum()
    }
}

/// Holds the live pattern set and keeps it consistent with its file
pub struct PatternRegistry {
    active: RwLock<Arc<PatternSet>>,
    path: Option<PathBuf>,
    // Serialises validate -> persist -> swap across concurrent reloads
    reload_lock: Mutex<()>,
}

impl PatternRegistry {
    /// In-memory registry seeded with the built-in patterns
    pub fn new() -> Self {
        Self::with_set(PatternSet::defaults(), None)
    }

    fn with_set(set: Arc<PatternSet>, path: Option<PathBuf>) -> Self {
        Self {
            active: RwLock::new(set),
            path,
            reload_lock: Mutex::new(()),
        }
    }

    /// Seed from the persisted file at `path`, falling back to the built-in
    /// patterns when it is absent or invalid. Later reloads persist there.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let set = match read_json_file(&path) {
            Ok(Some(raw)) => match PatternSet::from_json(&raw) {
                Ok(set) => {
                    info!(
                        "Loaded {} event patterns from {}",
                        set.pattern_count(),
                        path.display()
                    );
                    Arc::new(set)
                }
                Err(errors) => {
                    warn!("Ignoring invalid pattern file {}: {}", path.display(), errors);
                    PatternSet::defaults()
                }
            },
            Ok(None) => PatternSet::defaults(),
            Err(e) => {
                warn!("Could not read pattern file {}: {:#}", path.display(), e);
                PatternSet::defaults()
            }
        };
        Self::with_set(set, Some(path))
    }

    /// Snapshot of the live set
    pub fn current(&self) -> Arc<PatternSet> {
        self.active.read().clone()
    }

    /// Raw definitions of the live set
    pub fn definitions(&self) -> PatternDefinitions {
        self.current().definitions().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check a candidate without touching anything
    pub fn validate(&self, raw: &serde_json::Value) -> Result<(), ValidationErrors> {
        PatternSet::from_json(raw).map(|_| ())
    }

    /// Replace the whole live set. Nothing changes unless every pattern
    /// compiles and the file (when configured) was written.
    pub fn reload(&self, raw: &serde_json::Value) -> Result<Arc<PatternSet>, ReloadError> {
        let _guard = self.reload_lock.lock();

        let set = match PatternSet::from_json(raw) {
            Ok(set) => Arc::new(set),
            Err(errors) => {
                warn!("Rejected pattern reload: {}", errors);
                return Err(ReloadError::Invalid(errors));
            }
        };

        if let Some(path) = &self.path {
            write_json_atomic(path, &set.to_json()).map_err(ReloadError::Persist)?;
        }

        *self.active.write() = set.clone();
        info!("Event patterns reloaded ({} patterns)", set.pattern_count());
        Ok(set)
    }

    /// Re-read the persisted file and swap it in if it validates
    pub fn reload_from_disk(&self) -> Result<Arc<PatternSet>, ReloadError> {
        let _guard = self.reload_lock.lock();
        let Some(path) = &self.path else {
            return Ok(self.current());
        };

        let raw = read_json_file(path)
            .map_err(ReloadError::Persist)?
            .unwrap_or_else(|| PatternSet::defaults().to_json());
        let set = Arc::new(PatternSet::from_json(&raw)?);
        *self.active.write() = set.clone();
        info!("Event patterns reloaded from {}", path.display());
        Ok(set)
    }
}

impl Default for PatternRegistry {
    fn default() -> Self {
        Self::new()
    }
}
