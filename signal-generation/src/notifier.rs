// Alert dispatch
// Best-effort, at-most-once delivery of signal alerts off the ingestion path

use crate::ledger::EvidenceLedger;
use anyhow::Result;
use chrono::{DateTime, Utc};
use common::{AuditAction, AuditEntry, Direction, Signal, TargetType};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Source titles listed in an alert before the overflow count
pub const MAX_LISTED_SOURCES: usize = 3;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const DISPATCHER_ACTOR: &str = "alert-dispatcher";

/// Everything a notifier needs to announce a signal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub signal_id: Uuid,
    pub ticker: String,
    pub label: String,
    pub confidence: f64,
    pub direction: Direction,
    /// At most [`MAX_LISTED_SOURCES`] titles
    pub source_titles: Vec<String>,
    /// Titles left out of `source_titles`
    pub more_sources: usize,
    pub signal_time: DateTime<Utc>,
    pub novelty: f64,
    pub event_type: String,
    pub reason: String,
}

impl AlertPayload {
    pub fn new(signal: &Signal, mut titles: Vec<String>) -> Self {
        let more_sources = titles.len().saturating_sub(MAX_LISTED_SOURCES);
        titles.truncate(MAX_LISTED_SOURCES);
        Self {
            signal_id: signal.id,
            ticker: signal.ticker.clone(),
            label: signal.label.clone(),
            confidence: signal.confidence,
            direction: signal.direction,
            source_titles: titles,
            more_sources,
            signal_time: signal.signal_time,
            novelty: signal.components.novelty,
            event_type: signal.trigger.as_str().to_string(),
            reason: signal.alert_reason.clone().unwrap_or_default(),
        }
    }

    /// Slack-style attachment message
    pub fn to_webhook_message(&self) -> Value {
        let emoji = match self.direction {
            Direction::Up => "📈",
            Direction::Down => "📉",
            Direction::Neutral => "➡️",
        };
        let color = if self.confidence >= 0.8 {
            "good"
        } else if self.confidence >= 0.6 {
            "warning"
        } else {
            "danger"
        };

        let mut sources: Vec<String> = self
            .source_titles
            .iter()
            .map(|t| format!("• {}", t))
            .collect();
        if self.more_sources > 0 {
            sources.push(format!("• ... and {} more", self.more_sources));
        }

        let direction = match self.direction {
            Direction::Up => "Up",
            Direction::Down => "Down",
            Direction::Neutral => "Neutral",
        };

        json!({
            "text": format!("{} Signal Alert: {}", emoji, self.ticker),
            "attachments": [
                {
                    "color": color,
                    "fields": [
                        {"title": "Ticker", "value": self.ticker, "short": true},
                        {"title": "Signal", "value": self.label, "short": true},
                        {"title": "Confidence", "value": format!("{:.1}%", self.confidence * 100.0), "short": true},
                        {"title": "Direction", "value": direction, "short": true},
                        {"title": "Reason", "value": self.reason, "short": true},
                        {"title": "Sources", "value": sources.join("\n"), "short": false},
                    ],
                    "footer": "Signal Detection System",
                    "ts": self.signal_time.timestamp(),
                },
                {
                    "color": "#36a64f",
                    "title": "Signal Evidence",
                    "fields": [
                        {"title": "Novelty Score", "value": format!("{:.2}", self.novelty), "short": true},
                        {"title": "Event Type", "value": self.event_type, "short": true},
                    ],
                },
            ],
        })
    }
}

/// Trait for alert delivery channels
#[async_trait::async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, alert: &AlertPayload) -> Result<()>;
}

/// Posts alerts to a chat webhook; only logs them when no URL is configured
pub struct WebhookNotifier {
    webhook_url: Option<String>,
    client: Client,
}

impl WebhookNotifier {
    pub fn new(webhook_url: Option<String>) -> Result<Self> {
        let client = Client::builder().timeout(WEBHOOK_TIMEOUT).build()?;
        Ok(Self {
            webhook_url: webhook_url.filter(|u| !u.trim().is_empty()),
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

#[async_trait::async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, alert: &AlertPayload) -> Result<()> {
        let Some(url) = &self.webhook_url else {
            info!(
                "Alert DRY-RUN (no webhook configured): {} {} {:.2}",
                alert.ticker, alert.label, alert.confidence
            );
            return Ok(());
        };

        let response = self
            .client
            .post(url)
            .json(&alert.to_webhook_message())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Webhook returned {}", response.status()));
        }

        info!("Alert sent for {}: {}", alert.ticker, alert.label);
        Ok(())
    }
}

/// Bounded queue in front of a notifier, drained by one worker task.
///
/// `dispatch` never waits on the network. A full queue drops the alert;
/// drops and delivery failures are written to the audit trail.
pub struct AlertDispatcher {
    tx: mpsc::Sender<AlertPayload>,
    ledger: Arc<dyn EvidenceLedger>,
    worker: JoinHandle<()>,
}

impl AlertDispatcher {
    /// Start the worker. Must be called inside a tokio runtime.
    pub fn spawn(
        notifier: Arc<dyn AlertNotifier>,
        ledger: Arc<dyn EvidenceLedger>,
        capacity: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<AlertPayload>(capacity.max(1));
        let worker_ledger = ledger.clone();

        let worker = tokio::spawn(async move {
            while let Some(alert) = rx.recv().await {
                if let Err(e) = notifier.notify(&alert).await {
                    error!("Alert delivery failed for {}: {:#}", alert.ticker, e);
                    let entry = AuditEntry::new(
                        DISPATCHER_ACTOR,
                        AuditAction::AlertFailed,
                        TargetType::Signal,
                        alert.signal_id.to_string(),
                        json!({"ticker": alert.ticker, "error": format!("{:#}", e)}),
                    );
                    if let Err(e) = worker_ledger.append_audit(entry).await {
                        warn!("Failed to audit alert failure: {}", e);
                    }
                }
            }
            debug!("Alert worker stopped");
        });

        Self { tx, ledger, worker }
    }

    /// Queue an alert. Returns whether it was queued.
    pub async fn dispatch(&self, alert: AlertPayload) -> bool {
        let signal_id = alert.signal_id.to_string();
        let summary = json!({
            "ticker": alert.ticker,
            "label": alert.label,
            "confidence": alert.confidence,
            "reason": alert.reason,
        });

        let (action, queued) = match self.tx.try_send(alert) {
            Ok(()) => {
                debug!("Alert queued for signal {}", signal_id);
                (AuditAction::SendAlert, true)
            }
            Err(TrySendError::Full(alert)) => {
                warn!("Alert queue full, dropping alert for {}", alert.ticker);
                (AuditAction::AlertDropped, false)
            }
            Err(TrySendError::Closed(alert)) => {
                warn!("Alert worker stopped, dropping alert for {}", alert.ticker);
                (AuditAction::AlertDropped, false)
            }
        };

        let entry = AuditEntry::new(DISPATCHER_ACTOR, action, TargetType::Signal, signal_id, summary);
        if let Err(e) = self.ledger.append_audit(entry).await {
            warn!("Failed to audit alert dispatch: {}", e);
        }
        queued
    }

    /// Stop accepting alerts and wait for the queued ones to be delivered
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("Alert worker ended abnormally: {}", e);
        }
    }
}
