//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks metadata store and blob store

use crate::handlers::file_handlers::Gateway;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
}

/// `GET /healthz`
///
/// Very small liveness probe — always returns 200 OK with a plain JSON body.
/// This endpoint should be cheap and never perform I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

#[derive(Serialize)]
pub struct ReadyCheck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub metadata: ReadyCheck,
    pub blobstore: ReadyCheck,
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs a lightweight query against the metadata store.
/// 2. Performs a best-effort write/read/delete against the blob store.
///
/// Returns JSON describing each check. HTTP 200 when all checks pass,
/// HTTP 503 when any check fails.
pub async fn readyz(State(gateway): State<Gateway>) -> impl IntoResponse {
    let metadata = match gateway.ping_metadata().await {
        Ok(()) => ReadyCheck {
            ok: true,
            detail: None,
        },
        Err(e) => ReadyCheck {
            ok: false,
            detail: Some(e.to_string()),
        },
    };
    let blobstore = match gateway.probe_blobstore().await {
        Ok(()) => ReadyCheck {
            ok: true,
            detail: None,
        },
        Err(e) => ReadyCheck {
            ok: false,
            detail: Some(e.to_string()),
        },
    };

    let status = if metadata.ok && blobstore.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(ReadyResponse { metadata, blobstore }))
}
