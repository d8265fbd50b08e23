//! Identity resolver: the engine entry point.
//!
//! # Responsibility
//! - Run matcher, cluster analysis, optional merge and the new-secondary
//!   decision, then build the consolidated identity.
//!
//! # Invariants
//! - The only path that creates a primary is an empty match set.
//! - A secondary is created iff the request carries an email or a phone
//!   number unknown to the canonical cluster.
//! - The resolver holds no global state; storage is injected at
//!   construction and every call runs against it only.

use crate::model::contact::{Contact, ContactId, NewContact};
use crate::model::identity::ConsolidatedIdentity;
use crate::repo::contact_repo::ContactRepository;
use crate::service::cluster::{analyze, Cluster};
use crate::service::error::ResolveResult;
use crate::service::matcher::find_matching;
use crate::service::request::{InputError, ValidatedRequest};
use log::debug;

/// Outcome of one resolution, with what it changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub identity: ConsolidatedIdentity,
    /// Contact inserted by this call, primary or secondary.
    pub created: Option<Contact>,
    /// Former primaries demoted by this call.
    pub demoted_ids: Vec<ContactId>,
}

impl Resolution {
    pub fn created_primary(&self) -> bool {
        self.created.as_ref().is_some_and(Contact::is_primary)
    }
}

/// Resolution engine over an injected repository.
pub struct Resolver<R: ContactRepository> {
    repo: R,
}

impl<R: ContactRepository> Resolver<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Resolves a validated request.
    pub fn identify(&self, request: &ValidatedRequest) -> ResolveResult<Resolution> {
        self.resolve(request.email(), request.phone_number())
    }

    /// Resolves `(email, phone_number)` to its consolidated identity,
    /// creating, merging or linking contacts as needed.
    ///
    /// # Errors
    /// - `InputError::MissingContactFields` when both fields are absent.
    /// - `ConsistencyError` when stored clusters break their invariants.
    /// - Storage errors from the repository, unchanged.
    pub fn resolve(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> ResolveResult<Resolution> {
        if email.is_none() && phone_number.is_none() {
            return Err(InputError::MissingContactFields.into());
        }

        let matches = find_matching(&self.repo, email, phone_number)?;
        if matches.is_empty() {
            let primary = self
                .repo
                .insert(&NewContact::primary(email, phone_number))?;
            debug!(
                "event=contact_create module=service status=ok precedence=primary contact_id={}",
                primary.id
            );
            return Ok(Resolution {
                identity: singleton_identity(&primary),
                created: Some(primary),
                demoted_ids: Vec::new(),
            });
        }

        let analysis = analyze(&self.repo, &matches, email, phone_number)?;
        let demoted_ids = analysis
            .merge
            .as_ref()
            .map(|outcome| outcome.demoted_ids.clone())
            .unwrap_or_default();

        if !analysis.needs_new_secondary {
            return Ok(Resolution {
                identity: analysis.cluster.to_identity(),
                created: None,
                demoted_ids,
            });
        }

        let primary_id = analysis.canonical_primary().id;
        let secondary = self
            .repo
            .insert(&NewContact::secondary(email, phone_number, primary_id))?;
        debug!(
            "event=contact_create module=service status=ok precedence=secondary contact_id={} primary_id={}",
            secondary.id, primary_id
        );

        let cluster = Cluster::load(&self.repo, primary_id)?;
        Ok(Resolution {
            identity: cluster.to_identity(),
            created: Some(secondary),
            demoted_ids,
        })
    }

    /// Read-only view of the cluster containing `contact_id`.
    ///
    /// Returns `None` when the contact does not exist or is deleted.
    pub fn lookup(&self, contact_id: ContactId) -> ResolveResult<Option<ConsolidatedIdentity>> {
        let Some(contact) = self.repo.get_contact(contact_id)? else {
            return Ok(None);
        };
        let cluster_id = contact.cluster_id().unwrap_or(contact.id);
        let cluster = Cluster::load(&self.repo, cluster_id)?;
        Ok(Some(cluster.to_identity()))
    }
}

fn singleton_identity(primary: &Contact) -> ConsolidatedIdentity {
    ConsolidatedIdentity {
        primary_contact_id: primary.id,
        emails: primary.email.iter().cloned().collect(),
        phone_numbers: primary.phone_number.iter().cloned().collect(),
        secondary_contact_ids: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::Resolver;
    use crate::model::contact::LinkPrecedence;
    use crate::repo::memory_repo::InMemoryContactRepository;
    use crate::service::error::ResolveError;
    use crate::service::request::InputError;

    #[test]
    fn first_sighting_creates_a_singleton_primary() {
        let resolver = Resolver::new(InMemoryContactRepository::new());
        let resolution = resolver
            .resolve(Some("lorraine@hillvalley.edu"), Some("123456"))
            .unwrap();

        assert!(resolution.created_primary());
        let identity = resolution.identity;
        assert_eq!(identity.emails, vec!["lorraine@hillvalley.edu"]);
        assert_eq!(identity.phone_numbers, vec!["123456"]);
        assert!(identity.secondary_contact_ids.is_empty());
    }

    #[test]
    fn both_fields_absent_is_an_input_error() {
        let resolver = Resolver::new(InMemoryContactRepository::new());
        let err = resolver.resolve(None, None).unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Input(InputError::MissingContactFields)
        ));
        assert!(resolver.repo().all().is_empty());
    }

    #[test]
    fn one_new_field_is_enough_for_a_secondary() {
        let resolver = Resolver::new(InMemoryContactRepository::new());
        let primary_id = resolver
            .resolve(Some("doc@hillvalley.edu"), Some("111111"))
            .unwrap()
            .identity
            .primary_contact_id;

        let resolution = resolver
            .resolve(Some("doc@hillvalley.edu"), Some("222222"))
            .unwrap();
        let created = resolution.created.expect("secondary should be created");
        assert_eq!(created.link_precedence, LinkPrecedence::Secondary);
        assert_eq!(created.linked_id, Some(primary_id));
        assert_eq!(resolution.identity.phone_numbers, vec!["111111", "222222"]);
        assert_eq!(resolution.identity.secondary_contact_ids, vec![created.id]);
    }

    #[test]
    fn single_known_field_creates_nothing() {
        let resolver = Resolver::new(InMemoryContactRepository::new());
        resolver
            .resolve(Some("marty@hillvalley.edu"), Some("333333"))
            .unwrap();

        let resolution = resolver.resolve(None, Some("333333")).unwrap();
        assert!(resolution.created.is_none());
        assert_eq!(resolver.repo().all().len(), 1);
    }

    #[test]
    fn lookup_resolves_secondaries_to_their_cluster() {
        let resolver = Resolver::new(InMemoryContactRepository::new());
        let primary_id = resolver
            .resolve(Some("a@x.io"), Some("111111"))
            .unwrap()
            .identity
            .primary_contact_id;
        let secondary_id = resolver
            .resolve(Some("b@x.io"), Some("111111"))
            .unwrap()
            .created
            .unwrap()
            .id;

        let identity = resolver.lookup(secondary_id).unwrap().unwrap();
        assert_eq!(identity.primary_contact_id, primary_id);
        assert_eq!(identity.emails, vec!["a@x.io", "b@x.io"]);
        assert!(resolver.lookup(999).unwrap().is_none());
    }
}
