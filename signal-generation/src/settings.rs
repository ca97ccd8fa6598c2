//! Engine settings

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Process-level settings for the signal engine, loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Persisted fuser configuration (weights, source weights, priors)
    #[serde(default = "default_fuser_config_path")]
    pub fuser_config_path: String,

    /// Persisted event pattern set
    #[serde(default = "default_patterns_path")]
    pub patterns_path: String,

    /// Alert webhook; alerts are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Pending alerts held before new ones are dropped
    #[serde(default = "default_alert_queue_capacity")]
    pub alert_queue_capacity: usize,

    /// Documents processed concurrently in a batch
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,

    #[serde(default)]
    pub novelty: NoveltySettings,

    /// Sentiment score above which a document can set or reinforce direction
    #[serde(default = "default_strong_sentiment")]
    pub strong_sentiment_threshold: f64,

    /// Alert thresholds used when the fuser config does not carry its own
    #[serde(default)]
    pub thresholds: ThresholdSettings,

    /// Max log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            fuser_config_path: default_fuser_config_path(),
            patterns_path: default_patterns_path(),
            webhook_url: None,
            alert_queue_capacity: default_alert_queue_capacity(),
            max_concurrent_documents: default_max_concurrent_documents(),
            novelty: NoveltySettings::default(),
            strong_sentiment_threshold: default_strong_sentiment(),
            thresholds: ThresholdSettings::default(),
            log_level: default_log_level(),
        }
    }
}

fn default_fuser_config_path() -> String {
    "config/fuser_settings.json".to_string()
}

fn default_patterns_path() -> String {
    "config/event_patterns.json".to_string()
}

fn default_alert_queue_capacity() -> usize {
    64
}

fn default_max_concurrent_documents() -> usize {
    8
}

fn default_strong_sentiment() -> f64 {
    0.8
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Novelty and buzz windows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoveltySettings {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    /// Most recent comparison documents considered
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    #[serde(default = "default_buzz_window_hours")]
    pub buzz_window_hours: i64,

    /// Novelty reported when there is nothing usable to compare against
    #[serde(default = "default_cold_start_novelty")]
    pub cold_start_novelty: f64,
}

impl Default for NoveltySettings {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            history_limit: default_history_limit(),
            buzz_window_hours: default_buzz_window_hours(),
            cold_start_novelty: default_cold_start_novelty(),
        }
    }
}

fn default_lookback_days() -> i64 {
    30
}

fn default_history_limit() -> usize {
    100
}

fn default_buzz_window_hours() -> i64 {
    24
}

fn default_cold_start_novelty() -> f64 {
    1.0
}

/// Alert thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdSettings {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    #[serde(default = "default_high_priority_source_weight")]
    pub high_priority_source_weight: f64,

    #[serde(default = "default_high_novelty")]
    pub high_novelty: f64,
}

impl Default for ThresholdSettings {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            high_priority_source_weight: default_high_priority_source_weight(),
            high_novelty: default_high_novelty(),
        }
    }
}

fn default_min_confidence() -> f64 {
    0.6
}

fn default_high_priority_source_weight() -> f64 {
    0.8
}

fn default_high_novelty() -> f64 {
    0.7
}

/// Load settings from a TOML file; a missing file yields the defaults
pub fn load_settings(path: impl AsRef<Path>) -> anyhow::Result<EngineSettings> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(EngineSettings::default());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: EngineSettings = toml::from_str(&content)?;
    Ok(settings)
}

/// Save settings to a TOML file
pub fn save_settings(settings: &EngineSettings, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(settings)?;
    std::fs::write(path, content)?;
    Ok(())
}
