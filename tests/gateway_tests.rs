//! End-to-end tests of the storage gateway: upload/download/delete flows,
//! access control, audit trail, signed tokens, and backend failure
//! handling against a scratch disk store and in-memory metadata.

use bytes::Bytes;
use chrono::Utc;
use futures::future::join_all;
use sqlx::sqlite::SqlitePoolOptions;
use std::{
    collections::HashSet,
    io,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use storage_gateway::{
    blobstore::{BlobError, BlobResult, BlobStore, DiskBlobStore},
    config::Policy,
    models::{
        audit::{AuditOperation, AuditOutcome},
        stored_object::FileCategory,
    },
    services::{
        audit::AuditRecorder,
        gateway::{GatewayError, Identity, StorageGateway},
        metadata::MetadataStore,
        tokens::TokenIssuer,
    },
};
use tempfile::TempDir;

const OWNER: Identity = Identity {
    user_id: 7,
    organization_id: None,
};
const STRANGER: Identity = Identity {
    user_id: 8,
    organization_id: None,
};

struct Harness {
    gateway: StorageGateway<DiskBlobStore>,
    audit: AuditRecorder,
    storage: TempDir,
    _audit_dir: TempDir,
}

async fn metadata_store() -> MetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = MetadataStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

async fn harness_with_policy(policy: Policy) -> Harness {
    let storage = TempDir::new().unwrap();
    let audit_dir = TempDir::new().unwrap();
    let audit = AuditRecorder::new(audit_dir.path());
    let gateway = StorageGateway::new(
        DiskBlobStore::new(storage.path()),
        metadata_store().await,
        audit.clone(),
        TokenIssuer::new(b"integration-secret".to_vec()),
        Arc::new(policy),
    );
    Harness {
        gateway,
        audit,
        storage,
        _audit_dir: audit_dir,
    }
}

async fn harness() -> Harness {
    harness_with_policy(Policy::default()).await
}

fn today() -> String {
    Utc::now().format("%Y%m%d").to_string()
}

#[tokio::test]
async fn upload_then_download_returns_identical_bytes() {
    let h = harness().await;
    let payload = Bytes::from_static(b"%PDF-1.4 quarterly report");

    let outcome = h
        .gateway
        .upload(payload.clone(), "report.pdf", OWNER, FileCategory::Report, false)
        .await
        .unwrap();

    assert!(outcome.object.storage_key.starts_with("users/7/"));
    assert_eq!(outcome.object.version, 1);
    assert_eq!(outcome.object.size_bytes, payload.len() as i64);

    let (read_back, object) = h
        .gateway
        .download(&outcome.object.storage_key, OWNER.user_id, true)
        .await
        .unwrap();
    assert_eq!(read_back, payload);
    assert_eq!(object.content_hash, outcome.object.content_hash);
}

#[tokio::test]
async fn organization_uploads_land_in_organization_namespace() {
    let h = harness().await;
    let identity = Identity {
        user_id: 7,
        organization_id: Some(42),
    };
    let outcome = h
        .gateway
        .upload(
            Bytes::from_static(b"a,b\n1,2\n"),
            "statement.csv",
            identity,
            FileCategory::BankStatement,
            false,
        )
        .await
        .unwrap();
    assert!(
        outcome
            .object
            .storage_key
            .starts_with("organizations/42/users/7/")
    );
}

#[tokio::test]
async fn other_users_are_denied_download_and_delete() {
    let h = harness().await;
    let key = h
        .gateway
        .upload(
            Bytes::from_static(b"%PDF private"),
            "private.pdf",
            OWNER,
            FileCategory::Invoice,
            false,
        )
        .await
        .unwrap()
        .object
        .storage_key;

    match h.gateway.download(&key, STRANGER.user_id, false).await {
        Err(GatewayError::AccessDenied) => {}
        other => panic!("expected AccessDenied, got {:?}", other.map(|_| ())),
    }
    match h.gateway.delete(&key, STRANGER.user_id).await {
        Err(GatewayError::AccessDenied) => {}
        other => panic!("expected AccessDenied, got {:?}", other),
    }

    // Nothing mutated: the owner still reads the original bytes.
    let (bytes, _) = h.gateway.download(&key, OWNER.user_id, true).await.unwrap();
    assert_eq!(bytes.as_ref(), b"%PDF private");
}

#[tokio::test]
async fn rejected_uploads_leave_no_metadata_or_payload() {
    let h = harness().await;

    match h
        .gateway
        .upload(Bytes::new(), "empty.pdf", OWNER, FileCategory::Other, false)
        .await
    {
        Err(GatewayError::Validation(_)) => {}
        other => panic!("expected validation error, got {:?}", other.map(|_| ())),
    }

    let mut policy = Policy::default();
    policy.max_size_bytes = 8;
    let h2 = harness_with_policy(policy).await;
    let oversize = Bytes::from(vec![0u8; 9]);
    assert!(matches!(
        h2.gateway
            .upload(oversize, "big.pdf", OWNER, FileCategory::Other, false)
            .await,
        Err(GatewayError::Validation(_))
    ));

    for h in [&h, &h2] {
        assert!(h.gateway.list(OWNER, None, 100).await.unwrap().is_empty());
        assert!(h.audit.read_day(&today()).await.unwrap().is_empty());
        let leftovers: Vec<_> = std::fs::read_dir(h.storage.path()).unwrap().collect();
        assert!(leftovers.is_empty(), "blob store not empty: {:?}", leftovers);
    }
}

#[tokio::test]
async fn delete_is_deterministic_and_fully_audited() {
    let h = harness().await;
    let key = h
        .gateway
        .upload(
            Bytes::from_static(b"%PDF doomed"),
            "doomed.pdf",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
        .unwrap()
        .object
        .storage_key;

    h.gateway.delete(&key, OWNER.user_id).await.unwrap();

    // Tombstoned: downloads and re-deletes consistently report NotFound.
    for _ in 0..3 {
        assert!(matches!(
            h.gateway.download(&key, OWNER.user_id, false).await,
            Err(GatewayError::NotFound(_))
        ));
    }
    assert!(matches!(
        h.gateway.delete(&key, OWNER.user_id).await,
        Err(GatewayError::NotFound(_))
    ));

    // Listing no longer shows it, but stats/audit history survive.
    assert!(h.gateway.list(OWNER, None, 100).await.unwrap().is_empty());

    let records = h.audit.read_day(&today()).await.unwrap();
    let for_key: Vec<_> = records.iter().filter(|r| r.storage_key == key).collect();
    let deletes = for_key
        .iter()
        .filter(|r| r.operation == AuditOperation::Delete)
        .count();
    assert_eq!(deletes, 1, "expected exactly one delete record");
    let download_after_delete = for_key
        .iter()
        .skip_while(|r| r.operation != AuditOperation::Delete)
        .any(|r| r.operation == AuditOperation::Download);
    assert!(!download_after_delete, "download audited after delete");
}

#[tokio::test]
async fn concurrent_same_filename_uploads_get_distinct_keys() {
    let h = harness().await;
    let uploads = (0..16).map(|i| {
        let gateway = h.gateway.clone();
        async move {
            gateway
                .upload(
                    Bytes::from(format!("content {}", i).into_bytes()),
                    "statement.csv",
                    OWNER,
                    FileCategory::BankStatement,
                    false,
                )
                .await
                .unwrap()
                .object
        }
    });

    let objects = join_all(uploads).await;
    let keys: HashSet<_> = objects.iter().map(|o| o.storage_key.clone()).collect();
    assert_eq!(keys.len(), 16, "storage keys collided");

    // Versions cover 1..=16 exactly once for the logical object.
    let mut versions: Vec<_> = objects.iter().map(|o| o.version).collect();
    versions.sort_unstable();
    assert_eq!(versions, (1..=16).collect::<Vec<i64>>());
}

#[tokio::test]
async fn issued_token_redeems_until_object_is_deleted() {
    let h = harness().await;
    let outcome = h
        .gateway
        .upload(
            Bytes::from_static(b"%PDF shared"),
            "shared.pdf",
            OWNER,
            FileCategory::Other,
            true,
        )
        .await
        .unwrap();
    let token = outcome.access_token.expect("requested token");

    let (bytes, object) = h.gateway.redeem(&token).await.unwrap();
    assert_eq!(bytes.as_ref(), b"%PDF shared");
    assert_eq!(object.owner_user_id, OWNER.user_id);

    // The redemption is audited against the owner.
    let records = h.audit.read_day(&today()).await.unwrap();
    assert!(records.iter().any(|r| {
        r.operation == AuditOperation::Download
            && r.actor_user_id == OWNER.user_id
            && r.outcome == AuditOutcome::Success
    }));

    // Deletion closes the anonymous surface too.
    h.gateway
        .delete(&outcome.object.storage_key, OWNER.user_id)
        .await
        .unwrap();
    assert!(matches!(
        h.gateway.redeem(&token).await,
        Err(GatewayError::NotFound(_))
    ));
}

#[tokio::test]
async fn tampered_token_is_rejected() {
    let h = harness().await;
    let token = h
        .gateway
        .upload(
            Bytes::from_static(b"%PDF x"),
            "x.pdf",
            OWNER,
            FileCategory::Other,
            true,
        )
        .await
        .unwrap()
        .access_token
        .unwrap();

    let mut tampered = token.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x02;
    let tampered = String::from_utf8(tampered).unwrap();

    assert!(matches!(
        h.gateway.redeem(&tampered).await,
        Err(GatewayError::TokenInvalid)
    ));
}

#[tokio::test]
async fn corrupted_payload_surfaces_integrity_mismatch() {
    let h = harness().await;
    let key = h
        .gateway
        .upload(
            Bytes::from_static(b"ledger,balance\n"),
            "ledger.csv",
            OWNER,
            FileCategory::Template,
            false,
        )
        .await
        .unwrap()
        .object
        .storage_key;

    // Corrupt the payload behind the gateway's back.
    let on_disk = h.storage.path().join(&key);
    std::fs::write(&on_disk, b"ledger,tampered\n").unwrap();

    match h.gateway.download(&key, OWNER.user_id, true).await {
        Err(GatewayError::IntegrityMismatch { storage_key, .. }) => {
            assert_eq!(storage_key, key);
        }
        other => panic!("expected IntegrityMismatch, got {:?}", other.map(|_| ())),
    }

    // Without strict verification the (corrupt) bytes still come back.
    let (bytes, _) = h.gateway.download(&key, OWNER.user_id, false).await.unwrap();
    assert_eq!(bytes.as_ref(), b"ledger,tampered\n");
}

#[tokio::test]
async fn reupload_of_same_filename_bumps_version() {
    let h = harness().await;
    let first = h
        .gateway
        .upload(
            Bytes::from_static(b"v1"),
            "notes.csv",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
        .unwrap()
        .object;
    let second = h
        .gateway
        .upload(
            Bytes::from_static(b"v2 longer"),
            "notes.csv",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
        .unwrap()
        .object;

    assert_eq!(first.version, 1);
    assert_eq!(second.version, 2);
    assert_ne!(first.storage_key, second.storage_key);

    // Both versions remain independently downloadable.
    let (v1, _) = h
        .gateway
        .download(&first.storage_key, OWNER.user_id, true)
        .await
        .unwrap();
    assert_eq!(v1.as_ref(), b"v1");
}

#[tokio::test]
async fn stats_reflect_live_objects_only() {
    let h = harness().await;
    for name in ["a.pdf", "b.pdf"] {
        h.gateway
            .upload(
                Bytes::from_static(b"%PDF data"),
                name,
                OWNER,
                FileCategory::Invoice,
                false,
            )
            .await
            .unwrap();
    }
    let doomed = h
        .gateway
        .upload(
            Bytes::from_static(b"a,b\n"),
            "c.csv",
            OWNER,
            FileCategory::Template,
            false,
        )
        .await
        .unwrap()
        .object
        .storage_key;
    h.gateway.delete(&doomed, OWNER.user_id).await.unwrap();

    let stats = h.gateway.stats(OWNER).await.unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.files_by_category.get("invoice"), Some(&2));
    assert_eq!(stats.files_by_category.get("template"), None);
}

/// Blob store that fails transiently a configurable number of times before
/// delegating to a real disk store.
struct FlakyBlobStore {
    inner: DiskBlobStore,
    failures_left: AtomicU32,
}

impl FlakyBlobStore {
    fn new(inner: DiskBlobStore, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
        }
    }

    fn maybe_fail(&self) -> BlobResult<()> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(BlobError::Transient(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated network timeout",
            )));
        }
        Ok(())
    }
}

impl BlobStore for FlakyBlobStore {
    async fn put(&self, key: &str, payload: Bytes) -> BlobResult<()> {
        self.maybe_fail()?;
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        self.maybe_fail()?;
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn transient_backend_failures_are_retried_within_budget() {
    let storage = TempDir::new().unwrap();
    let audit_dir = TempDir::new().unwrap();
    let gateway = StorageGateway::new(
        FlakyBlobStore::new(DiskBlobStore::new(storage.path()), 2),
        metadata_store().await,
        AuditRecorder::new(audit_dir.path()),
        TokenIssuer::new(b"integration-secret".to_vec()),
        Arc::new(Policy::default()),
    );

    // Two transient failures sit inside the default retry budget of three.
    let outcome = gateway
        .upload(
            Bytes::from_static(b"%PDF resilient"),
            "resilient.pdf",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
        .unwrap();

    let (bytes, _) = gateway
        .download(&outcome.object.storage_key, OWNER.user_id, true)
        .await
        .unwrap();
    assert_eq!(bytes.as_ref(), b"%PDF resilient");
}

#[tokio::test]
async fn exhausted_retry_budget_surfaces_backend_unavailable() {
    let storage = TempDir::new().unwrap();
    let audit_dir = TempDir::new().unwrap();
    let mut policy = Policy::default();
    policy.max_retries = 1;
    let gateway = StorageGateway::new(
        FlakyBlobStore::new(DiskBlobStore::new(storage.path()), 10),
        metadata_store().await,
        AuditRecorder::new(audit_dir.path()),
        TokenIssuer::new(b"integration-secret".to_vec()),
        Arc::new(policy),
    );

    match gateway
        .upload(
            Bytes::from_static(b"%PDF doomed"),
            "doomed.pdf",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
    {
        Err(GatewayError::BackendUnavailable(_)) => {}
        other => panic!("expected BackendUnavailable, got {:?}", other.map(|_| ())),
    }
}

/// Blob store whose delete hangs; put/get delegate to a real disk store.
struct StalledDeleteBlobStore {
    inner: DiskBlobStore,
}

impl BlobStore for StalledDeleteBlobStore {
    async fn put(&self, key: &str, payload: Bytes) -> BlobResult<()> {
        self.inner.put(key, payload).await
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        self.inner.get(key).await
    }

    async fn delete(&self, _key: &str) -> BlobResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn delete_returns_within_budget_when_payload_removal_hangs() {
    let storage = TempDir::new().unwrap();
    let audit_dir = TempDir::new().unwrap();
    let mut policy = Policy::default();
    policy.operation_timeout = Duration::from_millis(50);
    let gateway = StorageGateway::new(
        StalledDeleteBlobStore {
            inner: DiskBlobStore::new(storage.path()),
        },
        metadata_store().await,
        AuditRecorder::new(audit_dir.path()),
        TokenIssuer::new(b"integration-secret".to_vec()),
        Arc::new(policy),
    );

    let key = gateway
        .upload(
            Bytes::from_static(b"%PDF stuck"),
            "stuck.pdf",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
        .unwrap()
        .object
        .storage_key;

    // Payload removal is best-effort, but still bounded: a stalled backend
    // must not hang the delete, and the tombstone lands regardless.
    tokio::time::timeout(Duration::from_secs(2), gateway.delete(&key, OWNER.user_id))
        .await
        .expect("delete blocked past the blob operation timeout")
        .unwrap();
    assert!(matches!(
        gateway.download(&key, OWNER.user_id, false).await,
        Err(GatewayError::NotFound(_))
    ));
}

/// Blob store whose calls hang long enough to trip the operation timeout.
struct StalledBlobStore;

impl BlobStore for StalledBlobStore {
    async fn put(&self, _key: &str, _payload: Bytes) -> BlobResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Bytes> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BlobError::NotFound(key.to_string()))
    }

    async fn delete(&self, _key: &str) -> BlobResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stalled_backend_reports_timeout_not_success() {
    let audit_dir = TempDir::new().unwrap();
    let mut policy = Policy::default();
    policy.operation_timeout = Duration::from_millis(50);
    let gateway = StorageGateway::new(
        StalledBlobStore,
        metadata_store().await,
        AuditRecorder::new(audit_dir.path()),
        TokenIssuer::new(b"integration-secret".to_vec()),
        Arc::new(policy),
    );

    match gateway
        .upload(
            Bytes::from_static(b"%PDF slow"),
            "slow.pdf",
            OWNER,
            FileCategory::Other,
            false,
        )
        .await
    {
        Err(GatewayError::Timeout(budget)) => {
            assert_eq!(budget, Duration::from_millis(50));
        }
        other => panic!("expected Timeout, got {:?}", other.map(|_| ())),
    }
}
