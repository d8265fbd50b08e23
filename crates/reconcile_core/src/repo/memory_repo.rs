//! In-memory contact repository.
//!
//! # Responsibility
//! - Provide a storage-free implementation of `ContactRepository` for
//!   engine tests and embedding callers that do not need persistence.
//!
//! # Invariants
//! - Ids and `created_at` values are strictly increasing per insert.
//! - Mirrors the SQLite contract: soft-deleted rows are invisible, demotion
//!   is a compare-and-swap, results are ordered by `created_at, id`.
//! - Single-threaded: every call is trivially atomic, so one `resolve` is
//!   one unit of work without an explicit transaction.

use crate::model::contact::{validate_link, Contact, ContactId, LinkPrecedence, NewContact};
use crate::repo::contact_repo::{ContactRepository, RepoError, RepoResult};
use std::cell::RefCell;

#[derive(Debug, Default)]
struct MemoryState {
    contacts: Vec<Contact>,
    next_id: ContactId,
    clock_ms: i64,
}

impl MemoryState {
    fn tick(&mut self) -> i64 {
        self.clock_ms += 1;
        self.clock_ms
    }

    fn active(&self) -> impl Iterator<Item = &Contact> {
        self.contacts.iter().filter(|contact| contact.is_active())
    }
}

/// `RefCell`-backed fake with a logical millisecond clock.
#[derive(Debug, Default)]
pub struct InMemoryContactRepository {
    state: RefCell<MemoryState>,
}

impl InMemoryContactRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a fully specified record as-is, bypassing validation.
    ///
    /// Used to stage histories (explicit timestamps, corrupted links) that
    /// the public write path would never produce.
    pub fn seed(&self, contact: Contact) {
        let mut state = self.state.borrow_mut();
        state.next_id = state.next_id.max(contact.id);
        state.clock_ms = state.clock_ms.max(contact.created_at);
        state.contacts.push(contact);
    }

    /// Marks one contact deleted.
    pub fn soft_delete(&self, id: ContactId) -> RepoResult<()> {
        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let contact = state
            .contacts
            .iter_mut()
            .find(|contact| contact.id == id)
            .ok_or(RepoError::NotFound(id))?;
        if contact.deleted_at.is_none() {
            contact.deleted_at = Some(now);
            contact.updated_at = now;
        }
        Ok(())
    }

    /// Snapshot of every stored record, deleted ones included.
    pub fn all(&self) -> Vec<Contact> {
        self.state.borrow().contacts.clone()
    }
}

fn sorted(mut contacts: Vec<Contact>) -> Vec<Contact> {
    contacts.sort_by_key(Contact::age_key);
    contacts
}

impl ContactRepository for InMemoryContactRepository {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        let state = self.state.borrow();
        let matches = state
            .active()
            .filter(|contact| {
                (email.is_some() && contact.email.as_deref() == email)
                    || (phone_number.is_some() && contact.phone_number.as_deref() == phone_number)
            })
            .cloned()
            .collect();
        Ok(sorted(matches))
    }

    fn find_by_primary_or_linked_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let state = self.state.borrow();
        let cluster = state
            .active()
            .filter(|contact| contact.id == primary_id || contact.linked_id == Some(primary_id))
            .cloned()
            .collect();
        Ok(sorted(cluster))
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let state = self.state.borrow();
        let found = state.active().find(|contact| contact.id == id).cloned();
        Ok(found)
    }

    fn insert(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        let mut state = self.state.borrow_mut();
        if contact.link_precedence == LinkPrecedence::Primary
            && state.active().any(|existing| {
                existing.is_primary()
                    && existing.email == contact.email
                    && existing.phone_number == contact.phone_number
            })
        {
            return Err(RepoError::Conflict(
                "a primary for this contact pair already exists".to_string(),
            ));
        }

        let now = state.tick();
        state.next_id += 1;
        let stored = Contact {
            id: state.next_id,
            email: contact.email.clone(),
            phone_number: contact.phone_number.clone(),
            linked_id: contact.linked_id,
            link_precedence: contact.link_precedence,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        state.contacts.push(stored.clone());
        Ok(stored)
    }

    fn update_precedence_and_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact> {
        validate_link(precedence, linked_id, Some(id))?;

        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let contact = state
            .contacts
            .iter_mut()
            .find(|contact| contact.id == id && contact.is_active())
            .ok_or(RepoError::NotFound(id))?;

        if precedence == LinkPrecedence::Secondary && !contact.is_primary() {
            return Err(RepoError::Conflict(format!(
                "contact {id} is already secondary"
            )));
        }

        contact.link_precedence = precedence;
        contact.linked_id = linked_id;
        contact.updated_at = now;
        Ok(contact.clone())
    }

    fn reparent_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> RepoResult<usize> {
        let mut state = self.state.borrow_mut();
        let now = state.tick();
        let mut changed = 0;
        for contact in state.contacts.iter_mut().filter(|contact| {
            contact.is_active()
                && !contact.is_primary()
                && contact.linked_id == Some(old_primary_id)
                && contact.id != new_primary_id
        }) {
            contact.linked_id = Some(new_primary_id);
            contact.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }
}
