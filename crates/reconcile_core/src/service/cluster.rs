//! Cluster loading and analysis.
//!
//! # Responsibility
//! - Load one cluster (primary plus direct secondaries) as a typed value.
//! - Derive the set of clusters a match set touches and pick the canonical
//!   primary, delegating to the merger when more than one is touched.
//! - Decide whether a request carries information the cluster lacks.
//!
//! # Invariants
//! - A loaded cluster always has exactly one active primary.
//! - Secondaries are held in `created_at ASC, id ASC` order.

use crate::model::contact::{Contact, ContactId};
use crate::model::identity::ConsolidatedIdentity;
use crate::repo::contact_repo::ContactRepository;
use crate::service::error::{ConsistencyError, ResolveResult};
use crate::service::merge::{merge_clusters, MergeOutcome};
use std::collections::BTreeSet;

/// One primary and every active secondary linked to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    primary: Contact,
    secondaries: Vec<Contact>,
}

impl Cluster {
    /// Reads the cluster rooted at `primary_id`.
    ///
    /// # Errors
    /// - `ConsistencyError::MissingPrimary` when `primary_id` is not an
    ///   active primary.
    pub fn load<R: ContactRepository + ?Sized>(
        repo: &R,
        primary_id: ContactId,
    ) -> ResolveResult<Self> {
        let contacts = repo.find_by_primary_or_linked_id(primary_id)?;
        let mut primary = None;
        let mut secondaries = Vec::new();
        for contact in contacts {
            if contact.id == primary_id {
                primary = Some(contact);
            } else if !contact.is_primary() {
                secondaries.push(contact);
            }
        }

        let primary = primary
            .filter(Contact::is_primary)
            .ok_or(ConsistencyError::MissingPrimary {
                cluster_id: primary_id,
            })?;
        secondaries.sort_by_key(Contact::age_key);
        Ok(Self {
            primary,
            secondaries,
        })
    }

    pub fn primary(&self) -> &Contact {
        &self.primary
    }

    pub fn secondaries(&self) -> &[Contact] {
        &self.secondaries
    }

    fn members(&self) -> impl Iterator<Item = &Contact> {
        std::iter::once(&self.primary).chain(self.secondaries.iter())
    }

    pub fn contains_email(&self, email: &str) -> bool {
        self.members()
            .any(|contact| contact.email.as_deref() == Some(email))
    }

    pub fn contains_phone_number(&self, phone_number: &str) -> bool {
        self.members()
            .any(|contact| contact.phone_number.as_deref() == Some(phone_number))
    }

    /// True when either supplied field is unknown to the whole cluster.
    pub fn lacks_any(&self, email: Option<&str>, phone_number: Option<&str>) -> bool {
        email.is_some_and(|email| !self.contains_email(email))
            || phone_number.is_some_and(|phone_number| !self.contains_phone_number(phone_number))
    }

    /// Emails, primary first, then secondaries by age; de-duplicated.
    pub fn emails(&self) -> Vec<String> {
        unique_in_order(self.members().filter_map(|contact| contact.email.as_deref()))
    }

    /// Phone numbers, primary first, then secondaries by age; de-duplicated.
    pub fn phone_numbers(&self) -> Vec<String> {
        unique_in_order(
            self.members()
                .filter_map(|contact| contact.phone_number.as_deref()),
        )
    }

    pub fn secondary_ids(&self) -> Vec<ContactId> {
        self.secondaries.iter().map(|contact| contact.id).collect()
    }

    pub fn to_identity(&self) -> ConsolidatedIdentity {
        ConsolidatedIdentity {
            primary_contact_id: self.primary.id,
            emails: self.emails(),
            phone_numbers: self.phone_numbers(),
            secondary_contact_ids: self.secondary_ids(),
        }
    }
}

fn unique_in_order<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .filter(|value| seen.insert(*value))
        .map(str::to_string)
        .collect()
}

/// Result of analyzing a non-empty match set.
#[derive(Debug, Clone)]
pub struct ClusterAnalysis {
    /// Canonical cluster after any merge.
    pub cluster: Cluster,
    pub needs_new_secondary: bool,
    /// Present when the match set bridged several clusters.
    pub merge: Option<MergeOutcome>,
}

impl ClusterAnalysis {
    pub fn canonical_primary(&self) -> &Contact {
        self.cluster.primary()
    }
}

/// Primary ids reached by a match set: matched primaries plus the link
/// targets of matched secondaries.
pub fn touched_primary_ids(matches: &[Contact]) -> BTreeSet<ContactId> {
    matches.iter().filter_map(Contact::cluster_id).collect()
}

/// Picks the canonical cluster for `matches`, merging when needed, and
/// decides whether the request adds information.
///
/// # Errors
/// - `ConsistencyError::EmptyTouchedSet` when no match resolves to a primary.
/// - `ConsistencyError::MissingPrimary` when a touched id is not a primary.
pub fn analyze<R: ContactRepository + ?Sized>(
    repo: &R,
    matches: &[Contact],
    email: Option<&str>,
    phone_number: Option<&str>,
) -> ResolveResult<ClusterAnalysis> {
    let touched = touched_primary_ids(matches);

    let Some(&first) = touched.first() else {
        return Err(ConsistencyError::EmptyTouchedSet {
            matched: matches.len(),
        }
        .into());
    };

    let merge = if touched.len() > 1 {
        Some(merge_clusters(repo, &touched)?)
    } else {
        None
    };
    let canonical_id = merge
        .as_ref()
        .map_or(first, |outcome| outcome.canonical.id);

    let cluster = Cluster::load(repo, canonical_id)?;
    let needs_new_secondary = cluster.lacks_any(email, phone_number);
    Ok(ClusterAnalysis {
        cluster,
        needs_new_secondary,
        merge,
    })
}
