//! Contact repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide the storage operations consumed by the resolution engine.
//! - Keep SQL details inside the persistence boundary.
//!
//! # Invariants
//! - Every read excludes soft-deleted rows and returns contacts ordered by
//!   `created_at ASC, id ASC`.
//! - Write paths validate link state before SQL mutations.
//! - Demotion is a compare-and-swap on `link_precedence`; losing the swap
//!   surfaces `RepoError::Conflict` instead of re-demoting.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::db::DbError;
use crate::model::contact::{
    validate_link, Contact, ContactId, ContactValidationError, LinkPrecedence, NewContact,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::error::Error;
use std::fmt::{Display, Formatter};

const CONTACT_SELECT_SQL: &str = "SELECT
    id,
    email,
    phone_number,
    linked_id,
    link_precedence,
    created_at,
    updated_at,
    deleted_at
FROM contacts";

const NOW_MS_SQL: &str = "CAST((julianday('now') - 2440587.5) * 86400000 AS INTEGER)";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for contact persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Validation(ContactValidationError),
    Db(DbError),
    NotFound(ContactId),
    InvalidData(String),
    /// A concurrent writer changed the row first (lost compare-and-swap or
    /// duplicate primary rejected by the pair guard).
    Conflict(String),
}

impl RepoError {
    /// Whether re-running the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Db(err) => err.is_busy(),
            Self::Conflict(_) => true,
            _ => false,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound(id) => write!(f, "contact not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted contact data: {message}"),
            Self::Conflict(message) => write!(f, "concurrent contact update: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound(_) | Self::InvalidData(_) | Self::Conflict(_) => None,
        }
    }
}

impl From<ContactValidationError> for RepoError {
    fn from(value: ContactValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage operations consumed by the resolution engine.
///
/// Implementations must let one `resolve` call compose these into a single
/// atomic unit of work; for SQLite that is the transaction the repository
/// is bound to.
pub trait ContactRepository {
    /// Active contacts whose email equals `email` OR whose phone equals `phone`.
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>>;
    /// Active contacts with `id = primary_id` or `linked_id = primary_id`.
    fn find_by_primary_or_linked_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>>;
    /// One active contact by id.
    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>>;
    /// Inserts one contact; storage assigns id and timestamps.
    fn insert(&self, contact: &NewContact) -> RepoResult<Contact>;
    /// Rewrites precedence/link of one contact and bumps `updated_at`.
    ///
    /// Demoting to `Secondary` only succeeds while the row is still primary.
    fn update_precedence_and_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact>;
    /// Re-points every active secondary of `old_primary_id`; returns the count.
    fn reparent_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> RepoResult<usize>;
}

impl<T: ContactRepository + ?Sized> ContactRepository for &T {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        (**self).find_by_email_or_phone(email, phone_number)
    }

    fn find_by_primary_or_linked_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        (**self).find_by_primary_or_linked_id(primary_id)
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        (**self).get_contact(id)
    }

    fn insert(&self, contact: &NewContact) -> RepoResult<Contact> {
        (**self).insert(contact)
    }

    fn update_precedence_and_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact> {
        (**self).update_precedence_and_link(id, precedence, linked_id)
    }

    fn reparent_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> RepoResult<usize> {
        (**self).reparent_secondaries(old_primary_id, new_primary_id)
    }
}

/// Secondary whose link does not land on an active primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkViolation {
    pub contact_id: ContactId,
    pub linked_id: ContactId,
    /// `true` when the target exists and is active but is itself secondary.
    pub chained: bool,
}

/// SQLite-backed contact repository.
///
/// Bind it to a `Transaction` (which derefs to `Connection`) to make every
/// call part of one unit of work.
pub struct SqliteContactRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteContactRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Soft-deletes one contact. Administrative; not used by resolution.
    pub fn soft_delete_contact(&self, id: ContactId) -> RepoResult<()> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    deleted_at = {NOW_MS_SQL},
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1
                   AND deleted_at IS NULL;"
            ),
            [id],
        )?;

        if changed == 0 && !row_exists(self.conn, id)? {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    /// Number of active contacts.
    pub fn count_active(&self) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contacts WHERE deleted_at IS NULL;",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Active secondaries whose link is dangling or points at a secondary.
    pub fn find_link_violations(&self) -> RepoResult<Vec<LinkViolation>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                c.id AS contact_id,
                c.linked_id AS linked_id,
                p.link_precedence AS target_precedence,
                p.deleted_at AS target_deleted_at
             FROM contacts c
             LEFT JOIN contacts p ON p.id = c.linked_id
             WHERE c.deleted_at IS NULL
               AND c.link_precedence = 'secondary'
               AND (
                    p.id IS NULL
                    OR p.deleted_at IS NOT NULL
                    OR p.link_precedence <> 'primary'
               )
             ORDER BY c.id ASC;",
        )?;

        let mut rows = stmt.query([])?;
        let mut violations = Vec::new();
        while let Some(row) = rows.next()? {
            let target_precedence: Option<String> = row.get("target_precedence")?;
            let target_deleted_at: Option<i64> = row.get("target_deleted_at")?;
            violations.push(LinkViolation {
                contact_id: row.get("contact_id")?,
                linked_id: row.get("linked_id")?,
                chained: target_deleted_at.is_none()
                    && target_precedence.as_deref() == Some("secondary"),
            });
        }

        Ok(violations)
    }
}

impl ContactRepository for SqliteContactRepository<'_> {
    fn find_by_email_or_phone(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> RepoResult<Vec<Contact>> {
        if email.is_none() && phone_number.is_none() {
            return Ok(Vec::new());
        }

        // NULL parameters never compare equal, so an absent field matches nothing.
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (email = ?1 OR phone_number = ?2)
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query(params![email, phone_number])?;
        collect_contacts(&mut rows)
    }

    fn find_by_primary_or_linked_id(&self, primary_id: ContactId) -> RepoResult<Vec<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE deleted_at IS NULL
               AND (id = ?1 OR linked_id = ?1)
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([primary_id])?;
        collect_contacts(&mut rows)
    }

    fn get_contact(&self, id: ContactId) -> RepoResult<Option<Contact>> {
        let mut stmt = self.conn.prepare(&format!(
            "{CONTACT_SELECT_SQL}
             WHERE id = ?1
               AND deleted_at IS NULL;"
        ))?;

        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_contact_row(row)?));
        }

        Ok(None)
    }

    fn insert(&self, contact: &NewContact) -> RepoResult<Contact> {
        contact.validate()?;

        let inserted = self.conn.execute(
            "INSERT INTO contacts (
                email,
                phone_number,
                linked_id,
                link_precedence
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                contact.email.as_deref(),
                contact.phone_number.as_deref(),
                contact.linked_id,
                contact.link_precedence.as_str(),
            ],
        );
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(RepoError::Conflict(
                    "a primary for this contact pair already exists".to_string(),
                ));
            }
            return Err(err.into());
        }

        let id = self.conn.last_insert_rowid();
        self.get_contact(id)?.ok_or_else(|| {
            RepoError::InvalidData(format!("inserted contact {id} not found in read-back"))
        })
    }

    fn update_precedence_and_link(
        &self,
        id: ContactId,
        precedence: LinkPrecedence,
        linked_id: Option<ContactId>,
    ) -> RepoResult<Contact> {
        validate_link(precedence, linked_id, Some(id))?;

        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    link_precedence = ?2,
                    linked_id = ?3,
                    updated_at = {NOW_MS_SQL}
                 WHERE id = ?1
                   AND deleted_at IS NULL
                   AND (?2 = 'primary' OR link_precedence = 'primary');"
            ),
            params![id, precedence.as_str(), linked_id],
        )?;

        if changed == 0 {
            return match self.get_contact(id)? {
                None => Err(RepoError::NotFound(id)),
                Some(current) => Err(RepoError::Conflict(format!(
                    "contact {id} is already {} of {}",
                    current.link_precedence,
                    current
                        .linked_id
                        .map_or_else(|| "none".to_string(), |value| value.to_string())
                ))),
            };
        }

        self.get_contact(id)?.ok_or(RepoError::NotFound(id))
    }

    fn reparent_secondaries(
        &self,
        old_primary_id: ContactId,
        new_primary_id: ContactId,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            &format!(
                "UPDATE contacts
                 SET
                    linked_id = ?2,
                    updated_at = {NOW_MS_SQL}
                 WHERE linked_id = ?1
                   AND link_precedence = 'secondary'
                   AND deleted_at IS NULL
                   AND id <> ?2;"
            ),
            params![old_primary_id, new_primary_id],
        )?;
        Ok(changed)
    }
}

fn collect_contacts(rows: &mut rusqlite::Rows<'_>) -> RepoResult<Vec<Contact>> {
    let mut contacts = Vec::new();
    while let Some(row) = rows.next()? {
        contacts.push(parse_contact_row(row)?);
    }
    Ok(contacts)
}

fn parse_contact_row(row: &Row<'_>) -> RepoResult<Contact> {
    let precedence_text: String = row.get("link_precedence")?;
    let link_precedence = LinkPrecedence::parse(&precedence_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid link precedence `{precedence_text}` in contacts.link_precedence"
        ))
    })?;

    let contact = Contact {
        id: row.get("id")?,
        email: row.get("email")?,
        phone_number: row.get("phone_number")?,
        linked_id: row.get("linked_id")?,
        link_precedence,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        deleted_at: row.get("deleted_at")?,
    };
    contact
        .validate()
        .map_err(|err| RepoError::InvalidData(format!("contact {}: {err}", contact.id)))?;
    Ok(contact)
}

fn row_exists(conn: &Connection, id: ContactId) -> RepoResult<bool> {
    let found = conn
        .query_row("SELECT 1 FROM contacts WHERE id = ?1;", [id], |row| {
            row.get::<_, i64>(0)
        })
        .optional()?;
    Ok(found.is_some())
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}
