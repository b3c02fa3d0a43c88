//! Governed object-storage gateway.
//!
//! Mediates upload, download, deletion, and listing of files against an
//! external blob store, attaching per-object metadata, ownership-based
//! access control, retention tagging, signed-access tokens, and an
//! append-only audit trail.

pub mod blobstore;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
