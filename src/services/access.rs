//! Ownership-based access control.
//!
//! Policy is deliberately narrow: the metadata owner, and only the owner,
//! may read or delete an object. `organization_id` is namespacing, not a
//! grant; widening access to organization members needs an explicit
//! sharing model first. Missing metadata is handled by the gateway as
//! `NotFound`, which is itself a denial.

use crate::models::stored_object::StoredObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOperation {
    Read,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    /// Object is tombstoned; reads and deletes both deny.
    Gone,
    /// Requester is not the owner.
    Deny,
}

/// Decide whether `user_id` may perform `operation` on `object`.
pub fn authorize(
    object: &StoredObject,
    user_id: i64,
    operation: AccessOperation,
) -> AccessDecision {
    // Tombstones always deny, regardless of requester or operation.
    if object.deleted {
        return AccessDecision::Gone;
    }
    match operation {
        AccessOperation::Read | AccessOperation::Delete => {
            if object.owner_user_id == user_id {
                AccessDecision::Allow
            } else {
                AccessDecision::Deny
            }
        }
    }
}
