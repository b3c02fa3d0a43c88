//! Pre-write validation of uploads against policy.
//!
//! Checks run in a fixed order and short-circuit on the first failure.
//! Validation has no side effects: a rejected upload leaves no metadata
//! and no payload behind.

use crate::{config::Policy, models::stored_object::FileCategory};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file is empty")]
    EmptyFile,
    #[error("file size {size} exceeds maximum of {max} bytes")]
    SizeExceeded { size: usize, max: usize },
    #[error("filename `{0}` has no recognized extension")]
    MissingExtension(String),
    #[error("file type `{0}` is not allowed")]
    DisallowedType(String),
}

/// Infer a MIME type from a filename extension.
///
/// The table covers exactly the formats the gateway accepts; anything else
/// comes back `None` and fails the allow-list check.
pub fn mime_type_for(filename: &str) -> Option<&'static str> {
    let ext = extension_of(filename)?;
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "xlsx" => Some("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"),
        "xls" => Some("application/vnd.ms-excel"),
        "csv" => Some("text/csv"),
        "docx" => Some("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
        _ => None,
    }
}

/// Lowercased extension of `filename`, if it has a non-empty one.
pub fn extension_of(filename: &str) -> Option<String> {
    let basename = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let (stem, ext) = basename.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Validate an upload. Returns the inferred MIME type on success so the
/// caller does not re-derive it.
pub fn validate(
    payload: &[u8],
    filename: &str,
    category: FileCategory,
    policy: &Policy,
) -> Result<&'static str, ValidationError> {
    if payload.is_empty() {
        return Err(ValidationError::EmptyFile);
    }
    if payload.len() > policy.max_size_bytes {
        return Err(ValidationError::SizeExceeded {
            size: payload.len(),
            max: policy.max_size_bytes,
        });
    }
    let ext = extension_of(filename)
        .ok_or_else(|| ValidationError::MissingExtension(filename.to_string()))?;
    let mime = mime_type_for(filename)
        .ok_or_else(|| ValidationError::DisallowedType(ext.clone()))?;

    let allowed = match category {
        FileCategory::Other => policy.allowed_mime_types.contains(&mime),
        _ => category.allowed_extensions().contains(&ext.as_str()),
    };
    if !allowed {
        return Err(ValidationError::DisallowedType(ext));
    }

    Ok(mime)
}
