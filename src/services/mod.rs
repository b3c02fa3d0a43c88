//! Gateway services: validation, key derivation, metadata, access control,
//! signed tokens, audit trail, and the orchestrator composing them.

pub mod access;
pub mod audit;
pub mod gateway;
pub mod metadata;
pub mod paths;
pub mod tokens;
pub mod validation;
