//! Error taxonomy for identity resolution.
//!
//! # Responsibility
//! - Separate caller mistakes, invariant violations and storage failures.
//! - Map every failure onto the two outcomes a transport exposes.
//!
//! # Invariants
//! - `Consistency` errors are never retried.
//! - Only busy/locked storage errors and lost compare-and-swaps are retryable.
//! - Rows that fail validation on read are reported as `Consistency`, not
//!   `Storage`.

use crate::model::contact::ContactId;
use crate::repo::contact_repo::RepoError;
use crate::service::request::InputError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ResolveResult<T> = Result<T, ResolveError>;

/// Transport-facing classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied unusable input (HTTP 400).
    BadRequest,
    /// Defect or storage failure (HTTP 500).
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest => "bad_request",
            Self::Internal => "internal_error",
        }
    }
}

/// Stored data breaks a cluster invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// A touched cluster (or the response cluster) has no active primary.
    MissingPrimary { cluster_id: ContactId },
    /// Contacts matched but none resolves to a primary.
    EmptyTouchedSet { matched: usize },
    /// A secondary links to a contact that is itself secondary.
    ChainedSecondary {
        contact_id: ContactId,
        linked_id: ContactId,
    },
    /// A secondary links to a missing or deleted contact.
    DanglingLink {
        contact_id: ContactId,
        linked_id: ContactId,
    },
    /// A stored row fails link/precedence validation when read back.
    CorruptRecord(String),
}

impl Display for ConsistencyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingPrimary { cluster_id } => {
                write!(f, "no primary contact found for cluster {cluster_id}")
            }
            Self::EmptyTouchedSet { matched } => write!(
                f,
                "{matched} matched contacts resolve to no primary contact"
            ),
            Self::ChainedSecondary {
                contact_id,
                linked_id,
            } => write!(
                f,
                "secondary contact {contact_id} links to secondary contact {linked_id}"
            ),
            Self::DanglingLink {
                contact_id,
                linked_id,
            } => write!(
                f,
                "secondary contact {contact_id} links to missing contact {linked_id}"
            ),
            Self::CorruptRecord(detail) => write!(f, "corrupt contact record: {detail}"),
        }
    }
}

impl Error for ConsistencyError {}

/// Failure of one `resolve` invocation.
#[derive(Debug)]
pub enum ResolveError {
    Input(InputError),
    Consistency(ConsistencyError),
    Storage(RepoError),
    /// Retryable failures persisted past the overall time budget.
    Timeout {
        attempts: u32,
        elapsed_ms: u128,
        last_error: RepoError,
    },
    /// Every allowed attempt failed with a retryable error inside the time
    /// budget.
    RetriesExhausted {
        attempts: u32,
        last_error: RepoError,
    },
}

impl ResolveError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Input(_) => ErrorKind::BadRequest,
            Self::Consistency(_)
            | Self::Storage(_)
            | Self::Timeout { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Stable short code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Input(_) => "invalid_input",
            Self::Consistency(_) => "consistency_violation",
            Self::Storage(_) => "storage_failure",
            Self::Timeout { .. } => "resolve_timeout",
            Self::RetriesExhausted { .. } => "retries_exhausted",
        }
    }
}

impl Display for ResolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Input(err) => write!(f, "{err}"),
            Self::Consistency(err) => write!(f, "inconsistent contact state: {err}"),
            Self::Storage(err) => write!(f, "{err}"),
            Self::Timeout {
                attempts,
                elapsed_ms,
                last_error,
            } => write!(
                f,
                "identity resolution did not complete after {attempts} attempts in {elapsed_ms}ms: {last_error}"
            ),
            Self::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "identity resolution failed on all {attempts} attempts: {last_error}"
            ),
        }
    }
}

impl Error for ResolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Input(err) => Some(err),
            Self::Consistency(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::Timeout { last_error, .. } | Self::RetriesExhausted { last_error, .. } => {
                Some(last_error)
            }
        }
    }
}

impl From<InputError> for ResolveError {
    fn from(value: InputError) -> Self {
        Self::Input(value)
    }
}

impl From<ConsistencyError> for ResolveError {
    fn from(value: ConsistencyError) -> Self {
        Self::Consistency(value)
    }
}

impl From<RepoError> for ResolveError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::InvalidData(detail) => {
                Self::Consistency(ConsistencyError::CorruptRecord(detail))
            }
            other => Self::Storage(other),
        }
    }
}

impl From<rusqlite::Error> for ResolveError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Storage(value.into())
    }
}
