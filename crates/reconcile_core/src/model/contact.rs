//! Contact domain model.
//!
//! # Responsibility
//! - Define the single persisted entity used by identity reconciliation.
//! - Provide link/precedence validation shared by every repository.
//!
//! # Invariants
//! - `linked_id` is set iff `link_precedence == Secondary`.
//! - A secondary never links to itself.
//! - `created_at` never changes after insert and is the "oldest" ordering key.
//! - Soft-deleted contacts (`deleted_at` set) are invisible to matching and
//!   merging but are never removed.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Storage-assigned contact identifier.
///
/// Monotonically increasing with insert order, so a lower id means an
/// earlier insert when two contacts share the same `created_at`.
pub type ContactId = i64;

/// Role of a contact inside its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkPrecedence {
    /// Canonical, oldest contact of a cluster.
    Primary,
    /// Contact subordinate to exactly one primary.
    Secondary,
}

impl LinkPrecedence {
    /// Stable storage/wire representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
        }
    }

    /// Parses the storage representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "primary" => Some(Self::Primary),
            "secondary" => Some(Self::Secondary),
            _ => None,
        }
    }
}

impl Display for LinkPrecedence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failures for contact link state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactValidationError {
    /// Neither email nor phone number is present.
    MissingContactFields,
    /// A secondary contact has no `linked_id`.
    SecondaryWithoutLink,
    /// A primary contact carries a `linked_id`.
    PrimaryWithLink { linked_id: ContactId },
    /// A secondary contact links to itself.
    SelfLink(ContactId),
}

impl Display for ContactValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContactFields => {
                write!(f, "contact requires at least one of email or phone number")
            }
            Self::SecondaryWithoutLink => write!(f, "secondary contact requires linked_id"),
            Self::PrimaryWithLink { linked_id } => {
                write!(f, "primary contact must not link to {linked_id}")
            }
            Self::SelfLink(id) => write!(f, "contact {id} cannot link to itself"),
        }
    }
}

impl Error for ContactValidationError {}

/// Persisted contact record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: ContactId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    /// Direct reference to the cluster primary. Set only for secondaries.
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds.
    pub updated_at: i64,
    /// Soft delete tombstone, unix epoch milliseconds.
    pub deleted_at: Option<i64>,
}

impl Contact {
    pub fn is_primary(&self) -> bool {
        self.link_precedence == LinkPrecedence::Primary
    }

    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Id of the cluster this contact belongs to.
    ///
    /// Returns `None` only for a corrupted secondary without a link.
    pub fn cluster_id(&self) -> Option<ContactId> {
        match self.link_precedence {
            LinkPrecedence::Primary => Some(self.id),
            LinkPrecedence::Secondary => self.linked_id,
        }
    }

    /// Ordering key for "oldest" comparisons: `created_at`, then `id`.
    pub fn age_key(&self) -> (i64, ContactId) {
        (self.created_at, self.id)
    }

    /// Validates link/precedence consistency of a persisted record.
    pub fn validate(&self) -> Result<(), ContactValidationError> {
        validate_link(self.link_precedence, self.linked_id, Some(self.id))
    }
}

/// Insert payload; storage assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub linked_id: Option<ContactId>,
    pub link_precedence: LinkPrecedence,
}

impl NewContact {
    /// Builds a new cluster root.
    pub fn primary(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
        }
    }

    /// Builds a secondary linked directly to `primary_id`.
    pub fn secondary(
        email: Option<&str>,
        phone_number: Option<&str>,
        primary_id: ContactId,
    ) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
            linked_id: Some(primary_id),
            link_precedence: LinkPrecedence::Secondary,
        }
    }

    pub fn validate(&self) -> Result<(), ContactValidationError> {
        if self.email.is_none() && self.phone_number.is_none() {
            return Err(ContactValidationError::MissingContactFields);
        }
        validate_link(self.link_precedence, self.linked_id, None)
    }
}

/// Checks that `linked_id` is set iff `precedence` is secondary and never
/// points back at `own_id`.
pub fn validate_link(
    precedence: LinkPrecedence,
    linked_id: Option<ContactId>,
    own_id: Option<ContactId>,
) -> Result<(), ContactValidationError> {
    match (precedence, linked_id) {
        (LinkPrecedence::Primary, Some(linked_id)) => {
            Err(ContactValidationError::PrimaryWithLink { linked_id })
        }
        (LinkPrecedence::Secondary, None) => Err(ContactValidationError::SecondaryWithoutLink),
        (LinkPrecedence::Secondary, Some(linked_id)) if own_id == Some(linked_id) => {
            Err(ContactValidationError::SelfLink(linked_id))
        }
        _ => Ok(()),
    }
}
