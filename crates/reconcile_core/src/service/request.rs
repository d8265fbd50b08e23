//! Identify request parsing and validation.
//!
//! # Responsibility
//! - Accept the `{ email?, phoneNumber? }` request shape, with the phone
//!   number given either as a JSON string or a JSON number.
//! - Normalize blank fields to absent and enforce basic format rules before
//!   the engine runs.
//!
//! # Invariants
//! - A `ValidatedRequest` always carries at least one field.
//! - Validated values are trimmed; no other normalization is applied, so
//!   matching stays exact.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use std::error::Error;
use std::fmt::{Display, Formatter};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[\d\s\-()]+$").expect("valid phone regex"));

const MIN_PHONE_DIGITS: usize = 6;

/// Caller-level input failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Neither email nor phone number supplied.
    MissingContactFields,
    InvalidEmail,
    InvalidPhoneNumber,
}

impl Display for InputError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContactFields => {
                write!(f, "either email or phoneNumber must be provided")
            }
            Self::InvalidEmail => write!(f, "invalid email format"),
            Self::InvalidPhoneNumber => write!(f, "invalid phone number format"),
        }
    }
}

impl Error for InputError {}

/// Raw identify request as received from a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyRequest {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "deserialize_phone_number")]
    pub phone_number: Option<String>,
}

impl IdentifyRequest {
    pub fn new(email: Option<&str>, phone_number: Option<&str>) -> Self {
        Self {
            email: email.map(str::to_string),
            phone_number: phone_number.map(str::to_string),
        }
    }

    /// Parses a JSON request body.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    /// Normalizes blank fields and checks formats.
    ///
    /// # Errors
    /// - `MissingContactFields` when both fields are absent or blank.
    /// - `InvalidEmail` / `InvalidPhoneNumber` on format mismatch.
    pub fn validate(&self) -> Result<ValidatedRequest, InputError> {
        let email = non_blank(self.email.as_deref());
        let phone_number = non_blank(self.phone_number.as_deref());

        if email.is_none() && phone_number.is_none() {
            return Err(InputError::MissingContactFields);
        }
        if let Some(email) = email.as_deref() {
            if !is_valid_email(email) {
                return Err(InputError::InvalidEmail);
            }
        }
        if let Some(phone_number) = phone_number.as_deref() {
            if !is_valid_phone_number(phone_number) {
                return Err(InputError::InvalidPhoneNumber);
            }
        }

        Ok(ValidatedRequest {
            email,
            phone_number,
        })
    }
}

/// Request that passed validation; at least one field is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    email: Option<String>,
    phone_number: Option<String>,
}

impl ValidatedRequest {
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn phone_number(&self) -> Option<&str> {
        self.phone_number.as_deref()
    }
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_valid_phone_number(value: &str) -> bool {
    PHONE_RE.is_match(value)
        && value.chars().filter(char::is_ascii_digit).count() >= MIN_PHONE_DIGITS
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PhoneNumberValue {
    Text(String),
    Number(serde_json::Number),
}

fn deserialize_phone_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<PhoneNumberValue>::deserialize(deserializer)?;
    Ok(value.map(|value| match value {
        PhoneNumberValue::Text(text) => text,
        PhoneNumberValue::Number(number) => number.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::{is_valid_phone_number, IdentifyRequest, InputError};

    #[test]
    fn phone_number_accepts_json_number_or_string() {
        let numeric = IdentifyRequest::from_json(r#"{"phoneNumber": 123456}"#).unwrap();
        assert_eq!(numeric.phone_number.as_deref(), Some("123456"));

        let text = IdentifyRequest::from_json(r#"{"email": null, "phoneNumber": "123456"}"#)
            .unwrap();
        assert_eq!(text.phone_number.as_deref(), Some("123456"));
        assert_eq!(text.email, None);
    }

    #[test]
    fn missing_or_blank_fields_are_rejected() {
        let empty = IdentifyRequest::from_json("{}").unwrap();
        assert_eq!(empty.validate(), Err(InputError::MissingContactFields));

        let blank = IdentifyRequest::new(Some("  "), Some(""));
        assert_eq!(blank.validate(), Err(InputError::MissingContactFields));
    }

    #[test]
    fn validate_trims_and_keeps_single_field() {
        let validated = IdentifyRequest::new(Some(" doc@hillvalley.edu "), Some(" "))
            .validate()
            .unwrap();
        assert_eq!(validated.email(), Some("doc@hillvalley.edu"));
        assert_eq!(validated.phone_number(), None);
    }

    #[test]
    fn format_checks_reject_malformed_values() {
        assert_eq!(
            IdentifyRequest::new(Some("not-an-email"), None).validate(),
            Err(InputError::InvalidEmail)
        );
        assert_eq!(
            IdentifyRequest::new(None, Some("12ab56")).validate(),
            Err(InputError::InvalidPhoneNumber)
        );
        assert!(!is_valid_phone_number("+1 (23)"));
        assert!(is_valid_phone_number("+1 (234) 567-890"));
    }
}
