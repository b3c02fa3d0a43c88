//! HTTP handlers for governed file operations.
//!
//! Identity arrives in `x-user-id` / `x-organization-id` headers, already
//! authenticated upstream; these handlers only shuttle it into the gateway
//! and translate gateway results into HTTP responses.

use crate::{
    blobstore::DiskBlobStore,
    errors::AppError,
    models::stored_object::FileCategory,
    services::gateway::{Identity, StorageGateway},
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::Deserialize;

/// Concrete gateway type served over HTTP.
pub type Gateway = StorageGateway<DiskBlobStore>;

/// Pull the trusted identity out of the request headers.
pub fn identity_from(headers: &HeaderMap) -> Result<Identity, AppError> {
    let user_id = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or_else(|| AppError::bad_request("missing or malformed x-user-id header"))?;
    let organization_id = match headers.get("x-organization-id") {
        None => None,
        Some(value) => Some(
            value
                .to_str()
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .ok_or_else(|| AppError::bad_request("malformed x-organization-id header"))?,
        ),
    };
    Ok(Identity {
        user_id,
        organization_id,
    })
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    /// Classification category; defaults to `other`.
    pub category: Option<String>,
    /// Mint a signed-access token alongside the descriptor.
    #[serde(default)]
    pub issue_token: bool,
}

/// `POST /files` — multipart upload. The first `file` field is stored.
pub async fn upload_file(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity_from(&headers)?;
    let category = query
        .category
        .as_deref()
        .unwrap_or("other")
        .parse::<FileCategory>()
        .map_err(AppError::bad_request)?;

    let mut upload: Option<(String, Bytes)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(str::to_string)
                .ok_or_else(|| AppError::bad_request("file field is missing a filename"))?;
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::bad_request(format!("reading upload body: {}", e)))?;
            upload = Some((filename, data));
            break;
        }
    }
    let (filename, payload) =
        upload.ok_or_else(|| AppError::bad_request("multipart body has no `file` field"))?;

    let outcome = gateway
        .upload(payload, &filename, identity, category, query.issue_token)
        .await?;

    Ok((StatusCode::CREATED, Json(outcome)))
}

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    /// Recompute and check the stored content hash before responding.
    #[serde(default)]
    pub verify: bool,
}

/// `GET /files/{*key}` — owner download, streamed back with stored metadata
/// in the headers.
pub async fn download_file(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let identity = identity_from(&headers)?;
    let (payload, object) = gateway.download(&key, identity.user_id, query.verify).await?;
    Ok(payload_response(payload, &object.mime_type, &object.content_hash))
}

/// `DELETE /files/{*key}` — tombstone and best-effort payload removal.
pub async fn delete_file(
    State(gateway): State<Gateway>,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity_from(&headers)?;
    gateway.delete(&key, identity.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub category: Option<String>,
    pub limit: Option<i64>,
}

/// `GET /files` — list the caller's live objects.
pub async fn list_files(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity_from(&headers)?;
    let category = query
        .category
        .as_deref()
        .map(str::parse::<FileCategory>)
        .transpose()
        .map_err(AppError::bad_request)?;
    let objects = gateway
        .list(identity, category, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(objects))
}

/// `GET /files/stats` — aggregate storage statistics for the caller.
pub async fn storage_stats(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity_from(&headers)?;
    let stats = gateway.stats(identity).await?;
    Ok(Json(stats))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub key: String,
}

/// `GET /token?key=…` — mint a signed-access token for an owned object.
pub async fn issue_token(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<impl IntoResponse, AppError> {
    let identity = identity_from(&headers)?;
    let token = gateway.issue_token(&query.key, identity.user_id).await?;
    Ok(Json(serde_json::json!({ "token": token })))
}

/// `GET /download/{token}` — anonymous token redemption.
pub async fn redeem_token(
    State(gateway): State<Gateway>,
    Path(token): Path<String>,
) -> Result<Response, AppError> {
    let (payload, object) = gateway.redeem(&token).await?;
    Ok(payload_response(payload, &object.mime_type, &object.content_hash))
}

fn payload_response(payload: Bytes, mime_type: &str, content_hash: &str) -> Response {
    let mut response = Response::new(Body::from(payload));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    if let Ok(value) = HeaderValue::from_str(content_hash) {
        headers.insert("x-content-sha256", value);
    }
    response
}
