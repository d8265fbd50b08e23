//! Core contact identity reconciliation.
//! This crate is the single source of truth for cluster invariants.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, ReconcileConfig, RetryPolicy};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LogError};
pub use model::contact::{
    Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
pub use model::identity::{ConsolidatedIdentity, IdentifyResponse};
pub use repo::contact_repo::{
    ContactRepository, LinkViolation, RepoError, RepoResult, SqliteContactRepository,
};
pub use repo::memory_repo::InMemoryContactRepository;
pub use service::error::{ConsistencyError, ErrorKind, ResolveError, ResolveResult};
pub use service::identify_service::{IdentifyService, IntegrityReport};
pub use service::request::{IdentifyRequest, InputError, ValidatedRequest};
pub use service::resolver::{Resolution, Resolver};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
