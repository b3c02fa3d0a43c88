//! Routes for the governed storage gateway.
//!
//! ## Structure
//! - **Owner-facing endpoints** (identity from `x-user-id` /
//!   `x-organization-id` headers, authenticated upstream)
//!   - `POST   /files` — multipart upload (`?category=`, `?issue_token=`)
//!   - `GET    /files` — list live objects (`?category=`, `?limit=`)
//!   - `GET    /files/stats` — aggregate storage statistics
//!   - `GET    /files/{*key}` — download (`?verify=true` for hash check)
//!   - `DELETE /files/{*key}` — tombstone + payload removal
//!   - `GET    /token?key=` — mint a signed-access token
//!
//! - **Anonymous endpoint**
//!   - `GET    /download/{token}` — redeem a signed-access token
//!
//! The wildcard `*key` carries full storage keys like
//! `users/7/20250614_..._report.pdf`.

use crate::handlers::{
    file_handlers::{
        Gateway, delete_file, download_file, issue_token, list_files, redeem_token, storage_stats,
        upload_file,
    },
    health_handlers::{healthz, readyz},
};
use crate::config::Policy;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Headroom on top of the policy payload maximum so multipart framing
/// never trips the transport limit before the gateway's own size check.
const BODY_FRAMING_SLACK: usize = 2 * 1024 * 1024;

/// Build and return the router for all gateway routes.
///
/// The router carries the shared `StorageGateway` state to all handlers,
/// and sizes the transport body limit from the policy payload maximum.
pub fn routes(policy: &Policy) -> Router<Gateway> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // file operations
        .route("/files", post(upload_file).get(list_files))
        .route("/files/stats", get(storage_stats))
        .route("/files/{*key}", get(download_file).delete(delete_file))
        .route("/token", get(issue_token))
        // anonymous signed-access redemption
        .route("/download/{token}", get(redeem_token))
        .layer(DefaultBodyLimit::max(
            policy.max_size_bytes + BODY_FRAMING_SLACK,
        ))
}
