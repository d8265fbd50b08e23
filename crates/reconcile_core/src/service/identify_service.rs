//! Transactional identify use-case over SQLite.
//!
//! # Responsibility
//! - Run one `Resolver` pass per request inside one SQLite transaction.
//! - Apply the bounded retry policy to lock contention and lost races.
//! - Provide read-only cluster views and an integrity scan for tooling.
//!
//! # Invariants
//! - Every identify call opens an IMMEDIATE transaction: one writer at a
//!   time per database, from the first match read to the response build.
//! - Any error drops the transaction, rolling back every write of the attempt.
//! - Consistency and input errors are returned on the first occurrence.
//! - No attempt starts after `RetryPolicy::overall_timeout`.

use crate::config::RetryPolicy;
use crate::model::contact::ContactId;
use crate::model::identity::{ConsolidatedIdentity, IdentifyResponse};
use crate::repo::contact_repo::{RepoError, SqliteContactRepository};
use crate::service::error::{ConsistencyError, ResolveError, ResolveResult};
use crate::service::request::{IdentifyRequest, ValidatedRequest};
use crate::service::resolver::{Resolution, Resolver};
use log::{error, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::time::Instant;
use uuid::Uuid;

/// Result of an integrity scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub active_contacts: u64,
    pub violations: Vec<ConsistencyError>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Identify service bound to one SQLite connection.
///
/// Concurrent callers each hold their own connection to the same database
/// file; SQLite's write lock serializes their transactions.
pub struct IdentifyService<'conn> {
    conn: &'conn mut Connection,
    retry: RetryPolicy,
}

impl<'conn> IdentifyService<'conn> {
    /// Creates a service with the default retry policy.
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self::with_retry_policy(conn, RetryPolicy::default())
    }

    pub fn with_retry_policy(conn: &'conn mut Connection, retry: RetryPolicy) -> Self {
        Self { conn, retry }
    }

    /// Validates and resolves one request, returning the response envelope.
    pub fn identify(&mut self, request: &IdentifyRequest) -> ResolveResult<IdentifyResponse> {
        let validated = request.validate()?;
        self.identify_validated(&validated)
            .map(|resolution| IdentifyResponse::from(resolution.identity))
    }

    /// Resolves an already validated request, reporting what changed.
    ///
    /// # Errors
    /// - `ResolveError::Timeout` when retryable failures outlast
    ///   `overall_timeout`.
    /// - `ResolveError::RetriesExhausted` when every allowed attempt failed
    ///   with a retryable error.
    /// - Any non-retryable error from the first attempt that raised it.
    pub fn identify_validated(&mut self, request: &ValidatedRequest) -> ResolveResult<Resolution> {
        let request_id = Uuid::new_v4();
        let started_at = Instant::now();
        info!(
            "event=identify module=service status=start request_id={} has_email={} has_phone={}",
            request_id,
            request.email().is_some(),
            request.phone_number().is_some()
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.run_once(request) {
                Ok(resolution) => {
                    info!(
                        "event=identify module=service status=ok request_id={} duration_ms={} attempts={} primary_id={} created={} demoted_count={}",
                        request_id,
                        started_at.elapsed().as_millis(),
                        attempt,
                        resolution.identity.primary_contact_id,
                        resolution
                            .created
                            .as_ref()
                            .map_or("none", |contact| contact.link_precedence.as_str()),
                        resolution.demoted_ids.len()
                    );
                    return Ok(resolution);
                }
                Err(err) if err.is_retryable() => {
                    let backoff = self.retry.backoff_for(attempt);
                    let out_of_attempts = attempt >= self.retry.max_attempts;
                    let out_of_time = started_at.elapsed() + backoff >= self.retry.overall_timeout;
                    if out_of_attempts || out_of_time {
                        let elapsed_ms = started_at.elapsed().as_millis();
                        let ResolveError::Storage(last_error) = err else {
                            return Err(err);
                        };
                        let exhausted = if out_of_time {
                            ResolveError::Timeout {
                                attempts: attempt,
                                elapsed_ms,
                                last_error,
                            }
                        } else {
                            ResolveError::RetriesExhausted {
                                attempts: attempt,
                                last_error,
                            }
                        };
                        error!(
                            "event=identify module=service status=error request_id={} duration_ms={} attempts={} error_code={} error={}",
                            request_id,
                            elapsed_ms,
                            attempt,
                            exhausted.error_code(),
                            exhausted
                        );
                        return Err(exhausted);
                    }

                    warn!(
                        "event=identify_retry module=service status=retry request_id={} attempt={} backoff_ms={} error={}",
                        request_id,
                        attempt,
                        backoff.as_millis(),
                        err
                    );
                    std::thread::sleep(backoff);
                }
                Err(err) => {
                    if matches!(err, ResolveError::Consistency(_)) {
                        error!(
                            "event=consistency_violation module=service status=error request_id={} error={}",
                            request_id, err
                        );
                    }
                    error!(
                        "event=identify module=service status=error request_id={} duration_ms={} attempts={} error_code={} error={}",
                        request_id,
                        started_at.elapsed().as_millis(),
                        attempt,
                        err.error_code(),
                        err
                    );
                    return Err(err);
                }
            }
        }
    }

    fn run_once(&mut self, request: &ValidatedRequest) -> ResolveResult<Resolution> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let resolution = Resolver::new(SqliteContactRepository::new(&tx)).identify(request)?;
        tx.commit()?;
        Ok(resolution)
    }

    /// Consolidated identity of the cluster containing `contact_id`,
    /// without writing anything.
    pub fn lookup(&mut self, contact_id: ContactId) -> ResolveResult<Option<ConsolidatedIdentity>> {
        let tx = self.conn.transaction()?;
        let identity = Resolver::new(SqliteContactRepository::new(&tx)).lookup(contact_id)?;
        tx.commit()?;
        Ok(identity)
    }

    /// Scans storage for secondaries that do not link to an active primary.
    pub fn verify_integrity(&mut self) -> Result<IntegrityReport, RepoError> {
        let tx = self.conn.transaction()?;
        let report = {
            let repo = SqliteContactRepository::new(&tx);
            let violations = repo
                .find_link_violations()?
                .into_iter()
                .map(|violation| {
                    if violation.chained {
                        ConsistencyError::ChainedSecondary {
                            contact_id: violation.contact_id,
                            linked_id: violation.linked_id,
                        }
                    } else {
                        ConsistencyError::DanglingLink {
                            contact_id: violation.contact_id,
                            linked_id: violation.linked_id,
                        }
                    }
                })
                .collect::<Vec<_>>();
            IntegrityReport {
                active_contacts: repo.count_active()?,
                violations,
            }
        };
        tx.commit()?;

        if !report.is_clean() {
            warn!(
                "event=integrity_scan module=service status=error violation_count={}",
                report.violations.len()
            );
        }
        Ok(report)
    }
}
