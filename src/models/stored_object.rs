//! Represents a governed object stored through the gateway.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Classification category for stored files.
///
/// Used for reporting and per-category validation allow-lists, never for
/// access enforcement. Closed set: unknown categories are rejected at the
/// edge rather than stored.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum FileCategory {
    Invoice,
    Receipt,
    BankStatement,
    Report,
    Template,
    Other,
}

impl FileCategory {
    /// Extensions accepted for this category. `Other` defers to the global
    /// MIME allow-list instead of an extension list.
    pub fn allowed_extensions(self) -> &'static [&'static str] {
        match self {
            FileCategory::Invoice | FileCategory::Receipt => &["pdf", "png", "jpg", "jpeg"],
            FileCategory::BankStatement => &["pdf", "xlsx", "xls", "csv"],
            FileCategory::Report => &["xlsx", "pdf", "docx"],
            FileCategory::Template => &["xlsx", "csv"],
            FileCategory::Other => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Invoice => "invoice",
            FileCategory::Receipt => "receipt",
            FileCategory::BankStatement => "bank_statement",
            FileCategory::Report => "report",
            FileCategory::Template => "template",
            FileCategory::Other => "other",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "invoice" => Ok(FileCategory::Invoice),
            "receipt" => Ok(FileCategory::Receipt),
            "bank_statement" => Ok(FileCategory::BankStatement),
            "report" => Ok(FileCategory::Report),
            "template" => Ok(FileCategory::Template),
            "other" => Ok(FileCategory::Other),
            unknown => Err(format!("unknown file category `{}`", unknown)),
        }
    }
}

/// Metadata record for one stored payload.
///
/// This record, not the blob store, is the sole source of truth for
/// ownership and authorization decisions. The payload bytes live behind the
/// `BlobStore` interface under `storage_key`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Unique storage key, derived deterministically and never reused.
    pub storage_key: String,

    /// Owner at creation time. Ownership never transfers.
    pub owner_user_id: i64,

    /// Organization the owner uploaded under, if any. Present for
    /// namespacing only; it does not widen access.
    pub organization_id: Option<i64>,

    /// Filename exactly as supplied by the caller.
    pub original_filename: String,

    /// Traversal-safe basename derived from the original filename.
    pub sanitized_filename: String,

    /// Classification category.
    pub category: FileCategory,

    /// Payload length in bytes at write time.
    pub size_bytes: i64,

    /// SHA-256 of the exact stored bytes, lowercase hex.
    pub content_hash: String,

    /// Declared/inferred MIME type, constrained to the allow-list.
    pub mime_type: String,

    /// Creation timestamp, immutable.
    pub created_at: DateTime<Utc>,

    /// Earliest time this record may be hard-purged. The gateway itself
    /// never removes metadata before this date.
    pub retention_until: DateTime<Utc>,

    /// Version of the logical object (owner + sanitized filename).
    /// Starts at 1; re-uploads of the same name get a fresh key and the
    /// next version number.
    pub version: i64,

    /// Compliance flag stamped from policy at creation.
    pub encrypted_at_rest: bool,

    /// Tombstone. Deleted objects keep their metadata for audit history.
    pub deleted: bool,
}
