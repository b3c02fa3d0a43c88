//! Metadata building and persistence.
//!
//! The metadata record is the sole source of truth for ownership,
//! retention, and integrity; the blob store is never asked who owns a
//! payload. Records are write-once per storage key (the path deriver's
//! uniqueness guarantee makes same-key races practically impossible), and
//! deletion is a tombstone UPDATE so audit history outlives the payload.

use crate::{
    config::Policy,
    models::stored_object::{FileCategory, StoredObject},
    services::paths,
};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::{collections::HashMap, sync::Arc};

const SELECT_COLUMNS: &str = "storage_key, owner_user_id, organization_id, original_filename, \
     sanitized_filename, category, size_bytes, content_hash, mime_type, \
     created_at, retention_until, version, encrypted_at_rest, deleted";

/// Aggregate storage statistics for one owner.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StorageStats {
    pub total_files: i64,
    pub total_size_bytes: i64,
    pub files_by_category: HashMap<String, i64>,
}

/// Assemble the full descriptor for a payload about to be stored.
///
/// The content hash is computed over the exact bytes being written, and
/// `retention_until` and the encryption flag come from static policy.
pub fn build_descriptor(
    filename: &str,
    payload: &[u8],
    owner_user_id: i64,
    organization_id: Option<i64>,
    category: FileCategory,
    mime_type: &str,
    storage_key: String,
    policy: &Policy,
) -> StoredObject {
    let created_at = Utc::now();
    StoredObject {
        storage_key,
        owner_user_id,
        organization_id,
        original_filename: filename.to_string(),
        sanitized_filename: paths::sanitize_filename(filename),
        category,
        size_bytes: payload.len() as i64,
        content_hash: hex::encode(Sha256::digest(payload)),
        mime_type: mime_type.to_string(),
        created_at,
        retention_until: created_at + policy.retention,
        // Placeholder; the store assigns the real version at insert time.
        version: 1,
        encrypted_at_rest: policy.encrypt_at_rest,
        deleted: false,
    }
}

/// SQLite-backed store for `StoredObject` records.
#[derive(Clone)]
pub struct MetadataStore {
    db: Arc<SqlitePool>,
}

impl MetadataStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema. Idempotent; used at startup and in tests.
    pub async fn migrate(&self) -> sqlx::Result<()> {
        let sql = include_str!("../../migrations/0001_init.sql");
        for stmt in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Lightweight connectivity check for readiness probes.
    pub async fn ping(&self) -> sqlx::Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    /// Insert a freshly built record. Write-once: a duplicate key is a
    /// hard error, never an overwrite.
    ///
    /// The version is assigned inside the INSERT (next version of the
    /// logical object = owner + sanitized filename) so concurrent uploads
    /// of the same name get distinct, gapless version numbers. Returns the
    /// assigned version.
    pub async fn insert(&self, object: &StoredObject) -> sqlx::Result<i64> {
        sqlx::query_scalar(
            "INSERT INTO stored_objects (
                storage_key, owner_user_id, organization_id, original_filename,
                sanitized_filename, category, size_bytes, content_hash, mime_type,
                created_at, retention_until, version, encrypted_at_rest, deleted
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                (SELECT COALESCE(MAX(version), 0) + 1 FROM stored_objects
                 WHERE owner_user_id = ? AND sanitized_filename = ?),
                ?, ?)
             RETURNING version",
        )
        .bind(&object.storage_key)
        .bind(object.owner_user_id)
        .bind(object.organization_id)
        .bind(&object.original_filename)
        .bind(&object.sanitized_filename)
        .bind(object.category)
        .bind(object.size_bytes)
        .bind(&object.content_hash)
        .bind(&object.mime_type)
        .bind(object.created_at)
        .bind(object.retention_until)
        .bind(object.owner_user_id)
        .bind(&object.sanitized_filename)
        .bind(object.encrypted_at_rest)
        .bind(object.deleted)
        .fetch_one(&*self.db)
        .await
    }

    /// Fetch a record by key, tombstoned or not. `None` when no metadata
    /// exists at all.
    pub async fn fetch(&self, storage_key: &str) -> sqlx::Result<Option<StoredObject>> {
        sqlx::query_as::<_, StoredObject>(&format!(
            "SELECT {} FROM stored_objects WHERE storage_key = ?",
            SELECT_COLUMNS
        ))
        .bind(storage_key)
        .fetch_optional(&*self.db)
        .await
    }

    /// Mark a record deleted. The single UPDATE makes the tombstone
    /// atomically visible to every subsequent authorize check. Returns
    /// false when the record was already tombstoned (or never existed).
    pub async fn tombstone(&self, storage_key: &str) -> sqlx::Result<bool> {
        let result =
            sqlx::query("UPDATE stored_objects SET deleted = 1 WHERE storage_key = ? AND deleted = 0")
                .bind(storage_key)
                .execute(&*self.db)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List live objects for one owner, newest first, optionally filtered
    /// by category.
    pub async fn list_for_owner(
        &self,
        owner_user_id: i64,
        organization_id: Option<i64>,
        category: Option<FileCategory>,
        limit: i64,
    ) -> sqlx::Result<Vec<StoredObject>> {
        let prefix = paths::namespace_prefix(owner_user_id, organization_id);
        let mut query = format!(
            "SELECT {} FROM stored_objects
             WHERE owner_user_id = ? AND deleted = 0 AND storage_key LIKE ?",
            SELECT_COLUMNS
        );
        if category.is_some() {
            query.push_str(" AND category = ?");
        }
        query.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut q = sqlx::query_as::<_, StoredObject>(&query)
            .bind(owner_user_id)
            .bind(format!("{}%", prefix));
        if let Some(category) = category {
            q = q.bind(category);
        }
        q.bind(limit.clamp(1, 1000)).fetch_all(&*self.db).await
    }

    /// Aggregate statistics over an owner's live objects.
    pub async fn stats_for_owner(
        &self,
        owner_user_id: i64,
        organization_id: Option<i64>,
    ) -> sqlx::Result<StorageStats> {
        let prefix = paths::namespace_prefix(owner_user_id, organization_id);
        let rows: Vec<(FileCategory, i64, i64)> = sqlx::query_as(
            "SELECT category, COUNT(*), COALESCE(SUM(size_bytes), 0)
             FROM stored_objects
             WHERE owner_user_id = ? AND deleted = 0 AND storage_key LIKE ?
             GROUP BY category",
        )
        .bind(owner_user_id)
        .bind(format!("{}%", prefix))
        .fetch_all(&*self.db)
        .await?;

        let mut stats = StorageStats {
            total_files: 0,
            total_size_bytes: 0,
            files_by_category: HashMap::new(),
        };
        for (category, count, size) in rows {
            stats.total_files += count;
            stats.total_size_bytes += size;
            stats
                .files_by_category
                .insert(category.as_str().to_string(), count);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn store() -> MetadataStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = MetadataStore::new(Arc::new(pool));
        store.migrate().await.unwrap();
        store
    }

    fn descriptor(key: &str, owner: i64) -> StoredObject {
        build_descriptor(
            "report.pdf",
            b"%PDF-1.4 content",
            owner,
            None,
            FileCategory::Report,
            "application/pdf",
            key.to_string(),
            &Policy::default(),
        )
    }

    #[tokio::test]
    async fn insert_and_fetch_round_trip() {
        let store = store().await;
        let obj = descriptor("users/7/k1_report.pdf", 7);
        assert_eq!(store.insert(&obj).await.unwrap(), 1);

        let fetched = store.fetch("users/7/k1_report.pdf").await.unwrap().unwrap();
        assert_eq!(fetched.owner_user_id, 7);
        assert_eq!(fetched.content_hash, obj.content_hash);
        assert_eq!(fetched.category, FileCategory::Report);
        assert!(!fetched.deleted);
    }

    #[tokio::test]
    async fn duplicate_key_insert_is_rejected() {
        let store = store().await;
        let obj = descriptor("users/7/k1_report.pdf", 7);
        store.insert(&obj).await.unwrap();
        assert!(store.insert(&obj).await.is_err());
    }

    #[tokio::test]
    async fn tombstone_is_atomic_and_single_shot() {
        let store = store().await;
        store
            .insert(&descriptor("users/7/k1_report.pdf", 7))
            .await
            .unwrap();

        assert!(store.tombstone("users/7/k1_report.pdf").await.unwrap());
        // Second tombstone finds nothing live.
        assert!(!store.tombstone("users/7/k1_report.pdf").await.unwrap());
        // Metadata survives for audit history.
        let fetched = store.fetch("users/7/k1_report.pdf").await.unwrap().unwrap();
        assert!(fetched.deleted);
    }

    #[tokio::test]
    async fn version_increments_per_logical_object() {
        let store = store().await;
        assert_eq!(
            store
                .insert(&descriptor("users/7/k1_report.pdf", 7))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .insert(&descriptor("users/7/k2_report.pdf", 7))
                .await
                .unwrap(),
            2
        );
        // A different owner starts the logical object over.
        assert_eq!(
            store
                .insert(&descriptor("users/8/k1_report.pdf", 8))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn listing_skips_tombstones_and_filters_by_category() {
        let store = store().await;
        store
            .insert(&descriptor("users/7/k1_report.pdf", 7))
            .await
            .unwrap();
        store
            .insert(&descriptor("users/7/k2_report.pdf", 7))
            .await
            .unwrap();
        store.tombstone("users/7/k2_report.pdf").await.unwrap();

        let listed = store.list_for_owner(7, None, None, 100).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].storage_key, "users/7/k1_report.pdf");

        let invoices = store
            .list_for_owner(7, None, Some(FileCategory::Invoice), 100)
            .await
            .unwrap();
        assert!(invoices.is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_live_objects() {
        let store = store().await;
        store
            .insert(&descriptor("users/7/k1_report.pdf", 7))
            .await
            .unwrap();
        store
            .insert(&descriptor("users/7/k2_report.pdf", 7))
            .await
            .unwrap();

        let stats = store.stats_for_owner(7, None).await.unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_size_bytes, 2 * 16);
        assert_eq!(stats.files_by_category.get("report"), Some(&2));
    }

    #[test]
    fn descriptor_hash_covers_exact_bytes() {
        let obj = descriptor("users/7/k_report.pdf", 7);
        assert_eq!(
            obj.content_hash,
            hex::encode(Sha256::digest(b"%PDF-1.4 content"))
        );
        assert_eq!(obj.size_bytes, 16);
        assert!(obj.retention_until > obj.created_at);
        assert!(obj.encrypted_at_rest);
    }
}
