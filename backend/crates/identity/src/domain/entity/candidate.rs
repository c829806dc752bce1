//! Link Candidate
//!
//! Ephemeral, scored suggestion that another record belongs to the same
//! person. Recomputed on demand, never persisted.

use chrono::{DateTime, Utc};
use derive_more::Display;
use kernel::id::{GroupId, UserId};
use serde::Serialize;

use crate::domain::value_object::{DisplayName, Email, PhoneNumber, ProviderAccount};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    #[display("email")]
    Email,
    #[display("phone")]
    Phone,
    #[display("provider_account")]
    ProviderAccount,
    #[display("name")]
    Name,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedAttribute {
    pub attribute_type: AttributeType,
    pub value: String,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCandidate {
    pub candidate_user_id: UserId,
    pub matched_attributes: Vec<MatchedAttribute>,
    /// 0..=100
    pub confidence: u8,
    pub reasons: Vec<String>,
    #[serde(skip)]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Store-level search for records sharing any attribute
#[derive(Debug, Clone, Default)]
pub struct CandidateQuery {
    pub email: Option<Email>,
    pub phone: Option<PhoneNumber>,
    pub name: Option<DisplayName>,
    pub provider_account: Option<ProviderAccount>,
    /// Records never returned
    pub exclude_user_ids: Vec<UserId>,
    /// Members of this group are never returned
    pub exclude_group: Option<GroupId>,
}

impl CandidateQuery {
    /// Nothing to search by
    pub fn is_empty(&self) -> bool {
        self.email.is_none()
            && self.phone.is_none()
            && self.name.is_none()
            && self.provider_account.is_none()
    }
}
