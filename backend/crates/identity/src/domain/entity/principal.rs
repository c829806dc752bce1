//! Authenticated Principal
//!
//! What callers get back from a successful authentication: the verified
//! record plus the aggregate view of its group.

use kernel::id::{GroupId, UserId};
use serde::{Deserialize, Serialize};

use crate::domain::entity::identity::IdentityRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Record whose credential was verified
    pub id: UserId,
    /// Group master, or `id` when ungrouped
    pub primary_account_id: UserId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub group_id: Option<GroupId>,
    pub linked_emails: Vec<String>,
    pub linked_phones: Vec<String>,
    pub linked_providers: Vec<String>,
    pub has_linked_accounts: bool,
    pub two_factor_enabled: bool,
}

impl Principal {
    /// Aggregate a subject with the active members of its group
    ///
    /// `members` may or may not include the subject and may contain inactive
    /// records; only active ones contribute.
    pub fn aggregate(subject: &IdentityRecord, members: &[IdentityRecord]) -> Self {
        let mut active: Vec<&IdentityRecord> = members
            .iter()
            .filter(|m| m.is_active() && m.user_id != subject.user_id)
            .filter(|m| subject.shares_group_with(m))
            .collect();
        active.push(subject);

        let master = active
            .iter()
            .copied()
            .find(|m| m.is_master())
            .unwrap_or(subject);

        let mut linked = subject.linked.clone();
        for member in &active {
            linked.absorb(&member.linked);
            linked.absorb(&member.own_identifiers());
        }

        let name = master
            .display_name
            .as_ref()
            .or(subject.display_name.as_ref())
            .map(|n| n.original().to_string());

        Self {
            id: subject.user_id,
            primary_account_id: master.user_id,
            email: subject.email.as_ref().map(|e| e.to_string()),
            phone_number: subject.phone_number.as_ref().map(|p| p.to_string()),
            name,
            image: subject
                .image_url
                .clone()
                .or_else(|| master.image_url.clone()),
            group_id: subject.group_id(),
            linked_emails: linked.emails.into_iter().collect(),
            linked_phones: linked.phones.into_iter().collect(),
            linked_providers: linked.providers.into_iter().collect(),
            has_linked_accounts: active.len() > 1,
            two_factor_enabled: subject.two_factor.enabled,
        }
    }
}
