//! Cluster merger.
//!
//! # Responsibility
//! - Collapse several clusters into the one rooted at the oldest primary.
//!
//! # Invariants
//! - Canonical primary is the smallest `(created_at, id)` among the inputs.
//! - Every demoted primary and all of its secondaries end up linked directly
//!   to the canonical primary, so no secondary is ever two hops away.
//! - All reads happen before the first write; callers run the whole merge
//!   inside one unit of work so a failure leaves no partial re-link behind.
//! - A single-cluster input performs no writes, including replays of an
//!   earlier merge.

use crate::model::contact::{Contact, ContactId, LinkPrecedence};
use crate::repo::contact_repo::ContactRepository;
use crate::service::cluster::Cluster;
use crate::service::error::{ConsistencyError, ResolveResult};
use log::info;
use std::collections::BTreeSet;

/// Result of one merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Surviving primary.
    pub canonical: Contact,
    /// Former primaries now secondary under `canonical`.
    pub demoted_ids: Vec<ContactId>,
    /// Secondaries re-pointed from a demoted primary.
    pub relinked: usize,
}

/// Merges the clusters rooted at `primary_ids` into the oldest one.
///
/// # Errors
/// - `ConsistencyError::MissingPrimary` when an id is missing, deleted or
///   links nowhere.
/// - `RepoError::Conflict` (as storage error) when a concurrent writer
///   demoted one of the primaries first; re-running resolution observes the
///   merged state.
pub fn merge_clusters<R: ContactRepository + ?Sized>(
    repo: &R,
    primary_ids: &BTreeSet<ContactId>,
) -> ResolveResult<MergeOutcome> {
    let roots = current_roots(repo, primary_ids)?;
    let clusters = roots
        .iter()
        .map(|id| Cluster::load(repo, *id))
        .collect::<ResolveResult<Vec<_>>>()?;

    let canonical = clusters
        .iter()
        .map(Cluster::primary)
        .min_by_key(|primary| primary.age_key())
        .cloned()
        .ok_or(ConsistencyError::EmptyTouchedSet { matched: 0 })?;

    let mut demoted_ids = Vec::new();
    let mut relinked = 0;
    for cluster in &clusters {
        let demoted_id = cluster.primary().id;
        if demoted_id == canonical.id {
            continue;
        }

        repo.update_precedence_and_link(
            demoted_id,
            LinkPrecedence::Secondary,
            Some(canonical.id),
        )?;
        relinked += repo.reparent_secondaries(demoted_id, canonical.id)?;
        demoted_ids.push(demoted_id);
    }

    if !demoted_ids.is_empty() {
        info!(
            "event=cluster_merge module=service status=ok canonical_id={} demoted_count={} relinked_count={}",
            canonical.id,
            demoted_ids.len(),
            relinked
        );
    }

    Ok(MergeOutcome {
        canonical,
        demoted_ids,
        relinked,
    })
}

/// Maps each id to the primary currently rooting its cluster, so ids demoted
/// by an earlier merge fold into the surviving cluster.
fn current_roots<R: ContactRepository + ?Sized>(
    repo: &R,
    ids: &BTreeSet<ContactId>,
) -> ResolveResult<BTreeSet<ContactId>> {
    let mut roots = BTreeSet::new();
    for &id in ids {
        let root = repo
            .get_contact(id)?
            .and_then(|contact| contact.cluster_id())
            .ok_or(ConsistencyError::MissingPrimary { cluster_id: id })?;
        roots.insert(root);
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::merge_clusters;
    use crate::model::contact::{Contact, LinkPrecedence, NewContact};
    use crate::repo::contact_repo::{ContactRepository, RepoError};
    use crate::repo::memory_repo::InMemoryContactRepository;
    use crate::service::error::{ConsistencyError, ResolveError};
    use std::collections::BTreeSet;

    fn primary_at(id: i64, created_at: i64, email: &str) -> Contact {
        Contact {
            id,
            email: Some(email.to_string()),
            phone_number: None,
            linked_id: None,
            link_precedence: LinkPrecedence::Primary,
            created_at,
            updated_at: created_at,
            deleted_at: None,
        }
    }

    #[test]
    fn oldest_primary_wins_and_dependents_are_flattened() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(1, 500, "young@x.io"));
        repo.seed(primary_at(2, 100, "old@x.io"));
        let dependent = repo
            .insert(&NewContact::secondary(Some("dep@x.io"), None, 1))
            .unwrap();

        let outcome = merge_clusters(&repo, &BTreeSet::from([1, 2])).unwrap();
        assert_eq!(outcome.canonical.id, 2);
        assert_eq!(outcome.demoted_ids, vec![1]);
        assert_eq!(outcome.relinked, 1);

        let demoted = repo.get_contact(1).unwrap().unwrap();
        assert_eq!(demoted.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(demoted.linked_id, Some(2));
        assert_eq!(
            repo.get_contact(dependent.id).unwrap().unwrap().linked_id,
            Some(2)
        );
    }

    #[test]
    fn equal_creation_time_falls_back_to_lower_id() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(7, 100, "seven@x.io"));
        repo.seed(primary_at(3, 100, "three@x.io"));

        let outcome = merge_clusters(&repo, &BTreeSet::from([3, 7])).unwrap();
        assert_eq!(outcome.canonical.id, 3);
    }

    #[test]
    fn single_cluster_is_a_no_op() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(1, 100, "solo@x.io"));
        let before = repo.all();

        let outcome = merge_clusters(&repo, &BTreeSet::from([1])).unwrap();
        assert_eq!(outcome.canonical.id, 1);
        assert!(outcome.demoted_ids.is_empty());
        assert_eq!(repo.all(), before);
    }

    #[test]
    fn replaying_a_merge_is_a_no_op() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(1, 100, "a@x.io"));
        repo.seed(primary_at(2, 200, "b@x.io"));

        let first = merge_clusters(&repo, &BTreeSet::from([1, 2])).unwrap();
        assert_eq!(first.demoted_ids, vec![2]);
        let after_first = repo.all();

        let replay = merge_clusters(&repo, &BTreeSet::from([1, 2])).unwrap();
        assert_eq!(replay.canonical.id, 1);
        assert!(replay.demoted_ids.is_empty());
        assert_eq!(replay.relinked, 0);
        assert_eq!(repo.all(), after_first);
    }

    #[test]
    fn demoting_an_already_secondary_contact_is_a_conflict() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(1, 100, "a@x.io"));
        repo.seed(primary_at(2, 200, "b@x.io"));
        repo.update_precedence_and_link(2, LinkPrecedence::Secondary, Some(1))
            .unwrap();

        let err = repo
            .update_precedence_and_link(2, LinkPrecedence::Secondary, Some(1))
            .unwrap_err();
        assert!(matches!(err, RepoError::Conflict(_)));
    }

    #[test]
    fn unknown_id_is_a_consistency_error() {
        let repo = InMemoryContactRepository::new();
        repo.seed(primary_at(1, 100, "a@x.io"));

        let err = merge_clusters(&repo, &BTreeSet::from([1, 42])).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Consistency(ConsistencyError::MissingPrimary { cluster_id: 42 })
        ));
    }
}
