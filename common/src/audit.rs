use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What an audit entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    IngestDocument,
    CreateSignal,
    SendAlert,
    AlertFailed,
    AlertDropped,
    DocumentFailed,
    ReloadConfig,
    ReloadPatterns,
    ReloadRejected,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::IngestDocument => "ingest_document",
            AuditAction::CreateSignal => "create_signal",
            AuditAction::SendAlert => "send_alert",
            AuditAction::AlertFailed => "alert_failed",
            AuditAction::AlertDropped => "alert_dropped",
            AuditAction::DocumentFailed => "document_failed",
            AuditAction::ReloadConfig => "reload_config",
            AuditAction::ReloadPatterns => "reload_patterns",
            AuditAction::ReloadRejected => "reload_rejected",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Document,
    Signal,
    FuserConfig,
    EventPatterns,
}

/// Append-only record of something the engine did
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    pub target_type: TargetType,
    pub target_id: String,
    pub payload: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        target_type: TargetType,
        target_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            actor: actor.into(),
            action,
            target_type,
            target_id: target_id.into(),
            payload,
        }
    }
}
