//! Consolidated identity view.
//!
//! # Responsibility
//! - Shape the response aggregated over one cluster.
//!
//! # Invariants
//! - `emails` and `phone_numbers` are de-duplicated; the primary's values
//!   come first, then secondaries in ascending creation order.
//! - `secondary_contact_ids` follow ascending creation order.

use crate::model::contact::ContactId;
use serde::{Deserialize, Serialize};

/// Aggregated view of every contact in one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidatedIdentity {
    pub primary_contact_id: ContactId,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<ContactId>,
}

/// Response envelope: `{ "contact": { ... } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedIdentity,
}

impl From<ConsolidatedIdentity> for IdentifyResponse {
    fn from(contact: ConsolidatedIdentity) -> Self {
        Self { contact }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConsolidatedIdentity, IdentifyResponse};

    #[test]
    fn response_uses_camel_case_envelope() {
        let response = IdentifyResponse::from(ConsolidatedIdentity {
            primary_contact_id: 1,
            emails: vec!["lorraine@hillvalley.edu".to_string()],
            phone_numbers: vec!["123456".to_string()],
            secondary_contact_ids: vec![23],
        });

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["contact"]["primaryContactId"], 1);
        assert_eq!(value["contact"]["phoneNumbers"][0], "123456");
        assert_eq!(value["contact"]["secondaryContactIds"][0], 23);
    }
}
