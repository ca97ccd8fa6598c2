//! Structured rejection of configuration and pattern reloads.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-key validation failures, in key order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Error)]
#[error("validation failed{}", summarize(.validation_errors))]
pub struct ValidationErrors {
    pub validation_errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.validation_errors
            .entry(key.into())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.validation_errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.validation_errors.values().map(Vec::len).sum()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.validation_errors.get(key).map(Vec::as_slice)
    }

    /// `Ok(value)` when nothing was recorded
    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

fn summarize(errors: &BTreeMap<String, Vec<String>>) -> String {
    errors
        .iter()
        .map(|(key, messages)| format!("; {}: {}", key, messages.join(", ")))
        .collect()
}

/// Why a reload did not take effect. In both cases the live state is unchanged.
#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Invalid(#[from] ValidationErrors),
    #[error("failed to persist configuration: {0}")]
    Persist(#[source] anyhow::Error),
}

impl ReloadError {
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            ReloadError::Invalid(errors) => Some(errors),
            ReloadError::Persist(_) => None,
        }
    }
}

/// Read a JSON value as a finite number; numeric strings are accepted.
pub fn parse_number(value: &serde_json::Value) -> Result<f64, String> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err("must be a finite number".to_string()),
        None => Err(format!("expected a number, got {}", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_messages_per_key() {
        let mut errors = ValidationErrors::new();
        errors.push("weights.W_SRC", "expected a number");
        errors.push("weights.W_SRC", "second problem");
        errors.push("tau", "must be positive");
        assert_eq!(errors.len(), 3);
        assert_eq!(errors.get("weights.W_SRC").unwrap().len(), 2);
        assert!(errors.clone().into_result(()).is_err());
        assert_eq!(
            errors.to_string(),
            "validation failed; tau: must be positive; weights.W_SRC: expected a number, second problem"
        );
    }

    #[test]
    fn test_serializes_under_validation_errors_key() {
        let mut errors = ValidationErrors::new();
        errors.push("litigation", "regex parse error");
        let value = serde_json::to_value(&errors).unwrap();
        assert_eq!(value, json!({"validation_errors": {"litigation": ["regex parse error"]}}));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(&json!(0.35)).unwrap(), 0.35);
        assert_eq!(parse_number(&json!("0.25")).unwrap(), 0.25);
        assert!(parse_number(&json!("abc")).is_err());
        assert!(parse_number(&json!(null)).is_err());
        assert!(parse_number(&json!([1])).is_err());
    }
}
