//! Identity resolution engine and use-case services.
//!
//! # Responsibility
//! - Matcher, cluster analyzer, merger and resolver over the repository
//!   contract.
//! - Transactional identify service over SQLite.
//! - Keep callers decoupled from storage details.

pub mod cluster;
pub mod error;
pub mod identify_service;
pub mod matcher;
pub mod merge;
pub mod request;
pub mod resolver;
