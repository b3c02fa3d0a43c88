//! Immutable audit records for storage operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The storage operation an audit record describes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    Upload,
    Download,
    Delete,
}

/// Whether the operation completed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// One line in the append-only audit log.
///
/// Records are never mutated or deleted by this crate; compliance
/// consumers read them back as a line-delimited JSON stream.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub operation: AuditOperation,
    pub storage_key: String,
    pub actor_user_id: i64,
    pub outcome: AuditOutcome,
    pub byte_count: i64,
}

impl AuditRecord {
    pub fn new(
        operation: AuditOperation,
        storage_key: impl Into<String>,
        actor_user_id: i64,
        outcome: AuditOutcome,
        byte_count: i64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            storage_key: storage_key.into(),
            actor_user_id,
            outcome,
            byte_count,
        }
    }
}
