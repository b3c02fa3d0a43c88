//! The gateway orchestrator.
//!
//! Composes validation, path derivation, metadata, access control, signed
//! tokens, and the audit trail around the external blob store. Every
//! operation is single-shot: no partial multi-object transactions, and an
//! upload is only reported successful once payload, metadata, and its
//! audit line are all in place.

use crate::{
    blobstore::{BlobError, BlobStore},
    config::Policy,
    models::{
        audit::{AuditOperation, AuditOutcome, AuditRecord},
        stored_object::{FileCategory, StoredObject},
    },
    services::{
        access::{self, AccessDecision, AccessOperation},
        audit::AuditRecorder,
        metadata::{self, MetadataStore, StorageStats},
        paths,
        tokens::{TokenError, TokenIssuer},
        validation::{self, ValidationError},
    },
};
use bytes::Bytes;
use sha2::Digest;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("access denied")]
    AccessDenied,
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("content hash mismatch for `{storage_key}`: stored {expected}, read back {actual}")]
    IntegrityMismatch {
        storage_key: String,
        expected: String,
        actual: String,
    },
    #[error("storage backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("access token has expired")]
    TokenExpired,
    #[error("access token is invalid")]
    TokenInvalid,
    #[error("metadata store failure")]
    Metadata(#[from] sqlx::Error),
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => GatewayError::TokenExpired,
            TokenError::Invalid => GatewayError::TokenInvalid,
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Caller identity, already authenticated upstream.
#[derive(Debug, Clone, Copy)]
pub struct Identity {
    pub user_id: i64,
    pub organization_id: Option<i64>,
}

/// Result of a successful upload.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadOutcome {
    pub object: StoredObject,
    /// Signed-access token, when the caller asked for one.
    pub access_token: Option<String>,
}

/// The governed storage gateway.
///
/// Generic over the blob store so tests and deployments pick their backend;
/// everything else (metadata, audit, tokens, policy) is owned here.
#[derive(Clone)]
pub struct StorageGateway<B: BlobStore> {
    blobs: Arc<B>,
    metadata: MetadataStore,
    audit: AuditRecorder,
    tokens: TokenIssuer,
    policy: Arc<Policy>,
}

impl<B: BlobStore> StorageGateway<B> {
    pub fn new(
        blobs: B,
        metadata: MetadataStore,
        audit: AuditRecorder,
        tokens: TokenIssuer,
        policy: Arc<Policy>,
    ) -> Self {
        Self {
            blobs: Arc::new(blobs),
            metadata,
            audit,
            tokens,
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Run one blob-store call under the policy timeout, retrying transient
    /// failures with exponential backoff up to the retry budget.
    async fn with_backend_budget<T, F, Fut>(&self, mut call: F) -> GatewayResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BlobError>>,
    {
        let mut backoff = Duration::from_millis(50);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = tokio::time::timeout(self.policy.operation_timeout, call()).await;
            match outcome {
                Err(_) => return Err(GatewayError::Timeout(self.policy.operation_timeout)),
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) if err.is_transient() && attempt <= self.policy.max_retries => {
                    warn!(attempt, error = %err, "transient blob store failure, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Ok(Err(BlobError::NotFound(key))) => return Err(GatewayError::NotFound(key)),
                Ok(Err(err)) => return Err(GatewayError::BackendUnavailable(err.to_string())),
            }
        }
    }

    /// Best-effort payload removal, still bounded by the policy timeout.
    /// Failures and timeouts are logged for reconciliation, never surfaced.
    async fn discard_payload(&self, storage_key: &str, context: &str) {
        let outcome =
            tokio::time::timeout(self.policy.operation_timeout, self.blobs.delete(storage_key))
                .await;
        match outcome {
            Ok(Ok(())) | Ok(Err(BlobError::NotFound(_))) => {}
            Ok(Err(err)) => warn!(
                storage_key,
                context,
                error = %err,
                "payload removal failed, flagging for reconciliation"
            ),
            Err(_) => warn!(
                storage_key,
                context, "payload removal timed out, flagging for reconciliation"
            ),
        }
    }

    /// Audit an operation. Failures here fail the enclosing operation:
    /// "object visibly changed but no audit trace" must never occur.
    async fn audit(
        &self,
        operation: AuditOperation,
        storage_key: &str,
        actor_user_id: i64,
        outcome: AuditOutcome,
        byte_count: i64,
    ) -> GatewayResult<()> {
        let record = AuditRecord::new(operation, storage_key, actor_user_id, outcome, byte_count);
        self.audit
            .record(&record)
            .await
            .map_err(|e| GatewayError::BackendUnavailable(format!("audit log: {}", e)))
    }

    /// Upload a payload on behalf of `identity`.
    ///
    /// Metadata is written only after the payload write succeeds; if the
    /// metadata write then fails, the payload is rolled back best-effort
    /// so no record ever points at bytes that were never governed.
    pub async fn upload(
        &self,
        payload: Bytes,
        filename: &str,
        identity: Identity,
        category: FileCategory,
        want_token: bool,
    ) -> GatewayResult<UploadOutcome> {
        let mime_type = validation::validate(&payload, filename, category, &self.policy)?;
        let storage_key =
            paths::derive_storage_key(filename, identity.user_id, identity.organization_id);

        self.with_backend_budget(|| {
            let blobs = self.blobs.clone();
            let key = storage_key.clone();
            let payload = payload.clone();
            async move { blobs.put(&key, payload).await }
        })
        .await?;

        let mut object = metadata::build_descriptor(
            filename,
            &payload,
            identity.user_id,
            identity.organization_id,
            category,
            mime_type,
            storage_key.clone(),
            &self.policy,
        );

        match self.metadata.insert(&object).await {
            Ok(version) => object.version = version,
            Err(err) => {
                // Roll the payload back rather than leave an orphan; if the
                // rollback also fails, reconciliation picks it up later.
                error!(storage_key = %storage_key, error = %err, "metadata write failed after payload write");
                self.discard_payload(&storage_key, "upload rollback").await;
                let _ = self
                    .audit(
                        AuditOperation::Upload,
                        &storage_key,
                        identity.user_id,
                        AuditOutcome::Failure,
                        object.size_bytes,
                    )
                    .await;
                return Err(err.into());
            }
        }

        self.audit(
            AuditOperation::Upload,
            &storage_key,
            identity.user_id,
            AuditOutcome::Success,
            object.size_bytes,
        )
        .await?;

        let access_token = want_token.then(|| self.tokens.issue(&storage_key, self.policy.token_ttl));

        Ok(UploadOutcome {
            object,
            access_token,
        })
    }

    /// Download a payload for its owner.
    ///
    /// With `verify_integrity`, the stored content hash is recomputed over
    /// the bytes read back; a mismatch is surfaced as its own alarm-worthy
    /// error kind, never papered over.
    pub async fn download(
        &self,
        storage_key: &str,
        user_id: i64,
        verify_integrity: bool,
    ) -> GatewayResult<(Bytes, StoredObject)> {
        let object = self.authorize(storage_key, user_id, AccessOperation::Read).await?;

        let payload = self
            .with_backend_budget(|| {
                let blobs = self.blobs.clone();
                let key = storage_key.to_string();
                async move { blobs.get(&key).await }
            })
            .await?;

        if verify_integrity {
            let actual = hex::encode(sha2::Sha256::digest(&payload));
            if actual != object.content_hash {
                error!(
                    storage_key,
                    expected = %object.content_hash,
                    actual = %actual,
                    "content hash mismatch on read"
                );
                return Err(GatewayError::IntegrityMismatch {
                    storage_key: storage_key.to_string(),
                    expected: object.content_hash.clone(),
                    actual,
                });
            }
        }

        self.audit(
            AuditOperation::Download,
            storage_key,
            user_id,
            AuditOutcome::Success,
            payload.len() as i64,
        )
        .await?;

        Ok((payload, object))
    }

    /// Delete an object: tombstone first, then best-effort payload removal.
    ///
    /// The tombstone is written even when payload removal fails, keeping
    /// ownership and audit history authoritative.
    pub async fn delete(&self, storage_key: &str, user_id: i64) -> GatewayResult<()> {
        let object = self
            .authorize(storage_key, user_id, AccessOperation::Delete)
            .await?;

        if !self.metadata.tombstone(storage_key).await? {
            // Raced with another delete; the object is gone either way.
            return Err(GatewayError::NotFound(storage_key.to_string()));
        }

        self.discard_payload(storage_key, "delete").await;

        self.audit(
            AuditOperation::Delete,
            storage_key,
            user_id,
            AuditOutcome::Success,
            object.size_bytes,
        )
        .await?;

        Ok(())
    }

    /// Redeem a signed-access token: the only anonymous surface.
    ///
    /// The token itself is the authorization; ownership is not rechecked,
    /// but tombstoned and missing objects still refuse. The download is
    /// audited against the object's owner.
    pub async fn redeem(&self, token: &str) -> GatewayResult<(Bytes, StoredObject)> {
        let storage_key = self.tokens.verify(token)?;

        let object = self
            .metadata
            .fetch(&storage_key)
            .await?
            .filter(|obj| !obj.deleted)
            .ok_or_else(|| GatewayError::NotFound(storage_key.clone()))?;

        let payload = self
            .with_backend_budget(|| {
                let blobs = self.blobs.clone();
                let key = storage_key.clone();
                async move { blobs.get(&key).await }
            })
            .await?;

        self.audit(
            AuditOperation::Download,
            &storage_key,
            object.owner_user_id,
            AuditOutcome::Success,
            payload.len() as i64,
        )
        .await?;

        Ok((payload, object))
    }

    /// Issue a fresh signed-access token for an object the caller owns.
    pub async fn issue_token(&self, storage_key: &str, user_id: i64) -> GatewayResult<String> {
        self.authorize(storage_key, user_id, AccessOperation::Read).await?;
        Ok(self.tokens.issue(storage_key, self.policy.token_ttl))
    }

    /// List the caller's live objects.
    pub async fn list(
        &self,
        identity: Identity,
        category: Option<FileCategory>,
        limit: i64,
    ) -> GatewayResult<Vec<StoredObject>> {
        Ok(self
            .metadata
            .list_for_owner(identity.user_id, identity.organization_id, category, limit)
            .await?)
    }

    /// Aggregate storage statistics for the caller.
    pub async fn stats(&self, identity: Identity) -> GatewayResult<StorageStats> {
        Ok(self
            .metadata
            .stats_for_owner(identity.user_id, identity.organization_id)
            .await?)
    }

    /// Readiness probe against the metadata store.
    pub async fn ping_metadata(&self) -> GatewayResult<()> {
        Ok(self.metadata.ping().await?)
    }

    /// Readiness probe against the blob store: write, read back, delete.
    pub async fn probe_blobstore(&self) -> GatewayResult<()> {
        let key = format!(".probes/readyz-{}", uuid::Uuid::new_v4());
        self.with_backend_budget(|| {
            let blobs = self.blobs.clone();
            let key = key.clone();
            async move { blobs.put(&key, Bytes::from_static(b"readyz")).await }
        })
        .await?;
        let read = self
            .with_backend_budget(|| {
                let blobs = self.blobs.clone();
                let key = key.clone();
                async move { blobs.get(&key).await }
            })
            .await?;
        if read.as_ref() != b"readyz" {
            return Err(GatewayError::BackendUnavailable(
                "readiness probe read back unexpected bytes".into(),
            ));
        }
        self.discard_payload(&key, "readiness probe").await;
        Ok(())
    }

    /// Fetch metadata and apply the access policy. Missing metadata and
    /// tombstones surface as `NotFound`; a live object owned by someone
    /// else surfaces as `AccessDenied`.
    async fn authorize(
        &self,
        storage_key: &str,
        user_id: i64,
        operation: AccessOperation,
    ) -> GatewayResult<StoredObject> {
        let object = self
            .metadata
            .fetch(storage_key)
            .await?
            .ok_or_else(|| GatewayError::NotFound(storage_key.to_string()))?;

        match access::authorize(&object, user_id, operation) {
            AccessDecision::Allow => Ok(object),
            AccessDecision::Gone => Err(GatewayError::NotFound(storage_key.to_string())),
            AccessDecision::Deny => Err(GatewayError::AccessDenied),
        }
    }
}
