//! Core data models for the storage gateway.
//!
//! These entities describe stored objects and their audit trail. They map
//! to SQLite rows via `sqlx::FromRow` and serialize naturally as JSON via
//! `serde`.

pub mod audit;
pub mod stored_object;
