//! Contact matcher.
//!
//! # Invariants
//! - Read only.
//! - Matches on email OR phone number, never AND.
//! - Output is ordered by `created_at ASC, id ASC` whatever the backend.

use crate::model::contact::Contact;
use crate::repo::contact_repo::{ContactRepository, RepoResult};

/// Returns every active contact sharing the email or the phone number.
///
/// Both fields absent short-circuits to an empty list without touching
/// storage.
pub fn find_matching<R: ContactRepository + ?Sized>(
    repo: &R,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> RepoResult<Vec<Contact>> {
    if email.is_none() && phone_number.is_none() {
        return Ok(Vec::new());
    }

    let mut matches = repo.find_by_email_or_phone(email, phone_number)?;
    matches.sort_by_key(Contact::age_key);
    Ok(matches)
}
