//! Fuser configuration and its hot-reload store
//!
//! `FuserConfig` is an immutable value. The store publishes it behind an
//! `Arc` and a reload builds a complete replacement, validates it, persists
//! it, and only then swaps the pointer.

use crate::settings::ThresholdSettings;
use common::persist::{read_json_file, write_json_atomic};
use common::{parse_number, EventCategory, ReloadError, ValidationErrors};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Key used in the source-weight and event-prior tables for the fallback value
pub const DEFAULT_KEY: &str = "default";

/// Primary weights, adjustment constants and the decay constant
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub w_src: f64,
    pub w_novel: f64,
    pub w_evt: f64,
    pub w_buzz: f64,
    pub k_cons: f64,
    pub k_unc: f64,
    /// Seconds
    pub tau: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            w_src: 0.35,
            w_novel: 0.25,
            w_evt: 0.25,
            w_buzz: 0.15,
            k_cons: 0.1,
            k_unc: 0.15,
            tau: 86_400.0,
        }
    }
}

impl FusionWeights {
    pub fn primary_sum(&self) -> f64 {
        self.w_src + self.w_novel + self.w_evt + self.w_buzz
    }
}

/// Thresholds for the alert decision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlertThresholds {
    pub min_confidence: f64,
    pub high_priority_source_weight: f64,
    pub high_novelty: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self::from(&ThresholdSettings::default())
    }
}

impl From<&ThresholdSettings> for AlertThresholds {
    fn from(settings: &ThresholdSettings) -> Self {
        Self {
            min_confidence: settings.min_confidence,
            high_priority_source_weight: settings.high_priority_source_weight,
            high_novelty: settings.high_novelty,
        }
    }
}

/// Everything the fuser reads at runtime
#[derive(Debug, Clone, PartialEq)]
pub struct FuserConfig {
    pub weights: FusionWeights,
    /// Lowercase source name -> weight
    pub source_weights: HashMap<String, f64>,
    pub default_source_weight: f64,
    pub event_priors: BTreeMap<EventCategory, f64>,
    pub default_event_prior: f64,
    pub thresholds: AlertThresholds,
}

impl Default for FuserConfig {
    fn default() -> Self {
        let source_weights = [
            ("dj", 0.9),
            ("nasdaq", 0.85),
            ("reuters", 0.9),
            ("bloomberg", 0.95),
            ("wsj", 0.9),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let event_priors = EventCategory::ALL
            .into_iter()
            .map(|c| (c, default_prior(c)))
            .collect();

        Self {
            weights: FusionWeights::default(),
            source_weights,
            default_source_weight: 0.5,
            event_priors,
            default_event_prior: 0.5,
            thresholds: AlertThresholds::default(),
        }
    }
}

fn default_prior(category: EventCategory) -> f64 {
    match category {
        EventCategory::GuidanceUp => 0.8,
        EventCategory::GuidanceDown => 0.85,
        EventCategory::EarningsBeat => 0.75,
        EventCategory::EarningsMiss => 0.8,
        EventCategory::MergerAcquisition => 0.9,
        EventCategory::Litigation => 0.6,
        EventCategory::ProductLaunch => 0.65,
        EventCategory::ExecutiveChange => 0.7,
        EventCategory::Dividend => 0.85,
        EventCategory::Buyback => 0.8,
    }
}

impl FuserConfig {
    /// Weight for a source, case-insensitive, falling back to the default
    pub fn source_weight(&self, source: &str) -> f64 {
        self.source_weights
            .get(&source.trim().to_lowercase())
            .copied()
            .unwrap_or(self.default_source_weight)
    }

    /// Prior for a category; sentiment-only signals get the default
    pub fn event_prior(&self, category: Option<EventCategory>) -> f64 {
        category
            .and_then(|c| self.event_priors.get(&c).copied())
            .unwrap_or(self.default_event_prior)
    }

    /// Parse and validate a persisted or submitted configuration.
    ///
    /// `weights` must carry all seven keys. `source_weights` and
    /// `event_priors` replace the built-in tables when present; their
    /// `default` entry sets the fallback. `thresholds` is optional and
    /// falls back to `fallback_thresholds`.
    pub fn from_json(
        raw: &Value,
        fallback_thresholds: AlertThresholds,
    ) -> Result<Self, ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let Some(root) = raw.as_object() else {
            errors.push("config", "payload must be an object");
            return Err(errors);
        };

        let builtin = FuserConfig::default();

        let weights = match root.get("weights") {
            Some(Value::Object(w)) => parse_weights(w, &mut errors),
            Some(_) => {
                errors.push("weights", "must be an object");
                builtin.weights
            }
            None => {
                errors.push("weights", "missing");
                builtin.weights
            }
        };

        let (source_weights, default_source_weight) = match root.get("source_weights") {
            None => (builtin.source_weights, builtin.default_source_weight),
            Some(Value::Object(map)) => {
                let mut table = HashMap::new();
                let mut fallback = builtin.default_source_weight;
                for (name, value) in map {
                    let key = format!("source_weights.{}", name);
                    let Some(weight) = unit_interval(value, &key, &mut errors) else {
                        continue;
                    };
                    let name = name.trim().to_lowercase();
                    if name == DEFAULT_KEY {
                        fallback = weight;
                    } else {
                        table.insert(name, weight);
                    }
                }
                (table, fallback)
            }
            Some(_) => {
                errors.push("source_weights", "must be an object");
                (builtin.source_weights, builtin.default_source_weight)
            }
        };

        let (event_priors, default_event_prior) = match root.get("event_priors") {
            None => (builtin.event_priors, builtin.default_event_prior),
            Some(Value::Object(map)) => {
                let mut table = BTreeMap::new();
                let mut fallback = builtin.default_event_prior;
                for (name, value) in map {
                    let key = format!("event_priors.{}", name);
                    let Some(prior) = unit_interval(value, &key, &mut errors) else {
                        continue;
                    };
                    if name.trim().eq_ignore_ascii_case(DEFAULT_KEY) {
                        fallback = prior;
                        continue;
                    }
                    match name.parse::<EventCategory>() {
                        Ok(category) => {
                            table.insert(category, prior);
                        }
                        Err(e) => errors.push(key, e.to_string()),
                    }
                }
                (table, fallback)
            }
            Some(_) => {
                errors.push("event_priors", "must be an object");
                (builtin.event_priors, builtin.default_event_prior)
            }
        };

        let thresholds = match root.get("thresholds") {
            None => fallback_thresholds,
            Some(Value::Object(t)) => parse_thresholds(t, fallback_thresholds, &mut errors),
            Some(_) => {
                errors.push("thresholds", "must be an object");
                fallback_thresholds
            }
        };

        errors.into_result(Self {
            weights,
            source_weights,
            default_source_weight,
            event_priors,
            default_event_prior,
            thresholds,
        })
    }

    /// Persisted JSON form; parses back through [`FuserConfig::from_json`]
    pub fn to_json(&self) -> Value {
        let mut sources: Map<String, Value> = self
            .source_weights
            .iter()
            .map(|(k, v)| (k.clone(), json!(v)))
            .collect();
        sources.insert(DEFAULT_KEY.to_string(), json!(self.default_source_weight));

        let mut priors: Map<String, Value> = self
            .event_priors
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), json!(v)))
            .collect();
        priors.insert(DEFAULT_KEY.to_string(), json!(self.default_event_prior));

        json!({
            "weights": {
                "W_SRC": self.weights.w_src,
                "W_NOVEL": self.weights.w_novel,
                "W_EVT": self.weights.w_evt,
                "W_BUZZ": self.weights.w_buzz,
                "K_CONS": self.weights.k_cons,
                "K_UNC": self.weights.k_unc,
                "TAU": self.weights.tau,
            },
            "source_weights": sources,
            "event_priors": priors,
            "thresholds": {
                "MIN_CONFIDENCE_DEFAULT": self.thresholds.min_confidence,
                "HIGH_PRIORITY_SOURCE_WEIGHT": self.thresholds.high_priority_source_weight,
                "HIGH_NOVELTY_THRESHOLD": self.thresholds.high_novelty,
            },
        })
    }
}

fn parse_weights(raw: &Map<String, Value>, errors: &mut ValidationErrors) -> FusionWeights {
    let defaults = FusionWeights::default();
    let before = errors.len();
    let mut read = |name: &str, fallback: f64| -> f64 {
        let key = format!("weights.{}", name);
        match raw.get(name).map(parse_number) {
            Some(Ok(v)) => v,
            Some(Err(e)) => {
                errors.push(key, e);
                fallback
            }
            None => {
                errors.push(key, "missing");
                fallback
            }
        }
    };

    let weights = FusionWeights {
        w_src: read("W_SRC", defaults.w_src),
        w_novel: read("W_NOVEL", defaults.w_novel),
        w_evt: read("W_EVT", defaults.w_evt),
        w_buzz: read("W_BUZZ", defaults.w_buzz),
        k_cons: read("K_CONS", defaults.k_cons),
        k_unc: read("K_UNC", defaults.k_unc),
        tau: read("TAU", defaults.tau),
    };
    if errors.len() > before {
        // Range checks on placeholder values would only add noise
        return weights;
    }

    for (name, value) in [
        ("W_SRC", weights.w_src),
        ("W_NOVEL", weights.w_novel),
        ("W_EVT", weights.w_evt),
        ("W_BUZZ", weights.w_buzz),
    ] {
        if value < 0.0 {
            errors.push(format!("weights.{}", name), "must not be negative");
        }
    }
    if weights.primary_sum() <= 0.0 {
        errors.push("weights", "sum of W_SRC, W_NOVEL, W_EVT and W_BUZZ must be > 0");
    }
    if weights.tau <= 0.0 {
        errors.push("weights.TAU", "must be > 0");
    }
    weights
}

fn parse_thresholds(
    raw: &Map<String, Value>,
    fallback: AlertThresholds,
    errors: &mut ValidationErrors,
) -> AlertThresholds {
    let mut read = |name: &str, fallback: f64| -> f64 {
        match raw.get(name) {
            None => fallback,
            Some(value) => {
                unit_interval(value, &format!("thresholds.{}", name), errors).unwrap_or(fallback)
            }
        }
    };
    AlertThresholds {
        min_confidence: read("MIN_CONFIDENCE_DEFAULT", fallback.min_confidence),
        high_priority_source_weight: read(
            "HIGH_PRIORITY_SOURCE_WEIGHT",
            fallback.high_priority_source_weight,
        ),
        high_novelty: read("HIGH_NOVELTY_THRESHOLD", fallback.high_novelty),
    }
}

fn unit_interval(value: &Value, key: &str, errors: &mut ValidationErrors) -> Option<f64> {
    match parse_number(value) {
        Ok(v) if (0.0..=1.0).contains(&v) => Some(v),
        Ok(_) => {
            errors.push(key, "must be within [0, 1]");
            None
        }
        Err(e) => {
            errors.push(key, e);
            None
        }
    }
}

/// Holds the live fuser configuration and keeps it consistent with its file
pub struct FuserConfigStore {
    active: RwLock<Arc<FuserConfig>>,
    path: Option<PathBuf>,
    fallback_thresholds: AlertThresholds,
    reload_lock: Mutex<()>,
}

impl FuserConfigStore {
    /// In-memory store seeded with the built-in configuration
    pub fn new(config: FuserConfig) -> Self {
        let fallback_thresholds = config.thresholds;
        Self {
            active: RwLock::new(Arc::new(config)),
            path: None,
            fallback_thresholds,
            reload_lock: Mutex::new(()),
        }
    }

    /// Seed from the persisted file at `path`, falling back to the built-in
    /// configuration when it is absent or invalid. Reloads persist there.
    pub fn load_or_default(path: impl AsRef<Path>, thresholds: AlertThresholds) -> Self {
        let path = path.as_ref().to_path_buf();
        let builtin = FuserConfig {
            thresholds,
            ..FuserConfig::default()
        };

        let config = match read_json_file(&path) {
            Ok(Some(raw)) => match FuserConfig::from_json(&raw, thresholds) {
                Ok(config) => {
                    info!("Loaded fuser configuration from {}", path.display());
                    config
                }
                Err(errors) => {
                    warn!("Ignoring invalid fuser configuration {}: {}", path.display(), errors);
                    builtin
                }
            },
            Ok(None) => builtin,
            Err(e) => {
                warn!("Could not read fuser configuration {}: {:#}", path.display(), e);
                builtin
            }
        };

        Self {
            active: RwLock::new(Arc::new(config)),
            path: Some(path),
            fallback_thresholds: thresholds,
            reload_lock: Mutex::new(()),
        }
    }

    /// Snapshot of the live configuration
    pub fn current(&self) -> Arc<FuserConfig> {
        self.active.read().clone()
    }

    pub fn validate(&self, raw: &Value) -> Result<FuserConfig, ValidationErrors> {
        FuserConfig::from_json(raw, self.fallback_thresholds)
    }

    /// Validate, persist, then publish. On any failure the live
    /// configuration and the file are unchanged.
    pub fn reload(&self, raw: &Value) -> Result<Arc<FuserConfig>, ReloadError> {
        let _guard = self.reload_lock.lock();

        let config = match self.validate(raw) {
            Ok(config) => Arc::new(config),
            Err(errors) => {
                warn!("Rejected fuser configuration reload: {}", errors);
                return Err(ReloadError::Invalid(errors));
            }
        };

        if let Some(path) = &self.path {
            write_json_atomic(path, &config.to_json()).map_err(ReloadError::Persist)?;
        }

        *self.active.write() = config.clone();
        info!(
            "Fuser configuration reloaded (weight sum {:.3}, {} sources, {} priors)",
            config.weights.primary_sum(),
            config.source_weights.len(),
            config.event_priors.len()
        );
        Ok(config)
    }
}

impl Default for FuserConfigStore {
    fn default() -> Self {
        Self::new(FuserConfig::default())
    }
}
