//! Domain model for contact identity reconciliation.
//!
//! # Responsibility
//! - Define the typed contact record shared by repositories and services.
//! - Define the consolidated identity view returned to callers.
//!
//! # Invariants
//! - Every contact belongs to exactly one cluster keyed by its primary's id.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod contact;
pub mod identity;
