//! Shared domain types for the news signal engine.
//!
//! Everything that crosses a crate boundary lives here: the normalized
//! documents handed to the engine, the events extracted from them, and the
//! signal / evidence / audit records the engine produces.

pub mod audit;
pub mod document;
pub mod events;
pub mod math;
pub mod persist;
pub mod signal;
pub mod validation;

pub use audit::{AuditAction, AuditEntry, TargetType};
pub use document::{NormalizedDocument, SentimentLabel};
pub use events::{EventCategory, EventPayload, ExtractedEvent, SignalTrigger, UnknownCategory};
pub use math::{clamp01, sigmoid};
pub use signal::{ActiveWeights, Direction, EvidenceKind, FusionComponents, Signal, SignalEvidence};
pub use validation::{parse_number, ReloadError, ValidationErrors};

pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
