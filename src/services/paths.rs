//! Storage-key derivation.
//!
//! Every payload is filed under a namespace rooted at its owner, with a
//! high-resolution timestamp and a random suffix making the key unique
//! even for concurrent re-uploads of the same filename. The derived key is
//! the only thing keeping one user's uploads out of another's key space,
//! so sanitization here is strict: no separators, no `..`, no control
//! characters survive.

use chrono::Utc;
use uuid::Uuid;

/// Reduce a caller-supplied filename to a safe basename.
///
/// Path separators become underscores after the leading directory part is
/// dropped, parent references disappear, and anything outside
/// `[A-Za-z0-9._-]` is replaced. Leading dots are stripped so the result
/// can never be empty-ish or reconstruct a traversal. Falls back to
/// `"unnamed"` when nothing printable remains.
pub fn sanitize_filename(filename: &str) -> String {
    let basename = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let mut sanitized = String::with_capacity(basename.len());
    for ch in basename.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '_' | '-' => sanitized.push(ch),
            ' ' => sanitized.push('_'),
            _ => {}
        }
    }
    while sanitized.contains("..") {
        sanitized = sanitized.replace("..", ".");
    }
    let trimmed = sanitized.trim_matches(['.', '-']).to_string();
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed
    }
}

/// Derive a unique, traversal-safe storage key for an upload.
///
/// Keys look like `users/7/20250614_142530_183920114_9f2c1a07_report.pdf`,
/// or with an organization prefix,
/// `organizations/3/users/7/…`. The timestamp carries nanoseconds and the
/// suffix is random, so two uploads of the same name never collide.
pub fn derive_storage_key(
    filename: &str,
    owner_user_id: i64,
    organization_id: Option<i64>,
) -> String {
    let safe_name = sanitize_filename(filename);
    let stamp = Utc::now().format("%Y%m%d_%H%M%S_%f");
    let nonce = Uuid::new_v4().simple().to_string();
    let unique_name = format!("{}_{}_{}", stamp, &nonce[..8], safe_name);

    match organization_id {
        Some(org) => format!(
            "organizations/{}/users/{}/{}",
            org, owner_user_id, unique_name
        ),
        None => format!("users/{}/{}", owner_user_id, unique_name),
    }
}

/// Namespace prefix a caller's keys must live under.
pub fn namespace_prefix(owner_user_id: i64, organization_id: Option<i64>) -> String {
    match organization_id {
        Some(org) => format!("organizations/{}/users/{}/", org, owner_user_id),
        None => format!("users/{}/", owner_user_id),
    }
}
