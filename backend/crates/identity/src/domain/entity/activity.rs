//! Activity / Security Event
//!
//! Append-only audit record. Write-only from this crate's perspective.

use chrono::{DateTime, Utc};
use derive_more::Display;
use kernel::id::{EventId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[display("signin_success")]
    SigninSuccess,
    #[display("signin_failed")]
    SigninFailed,
    #[display("oauth_linked")]
    OauthLinked,
    #[display("backup_code_used")]
    BackupCodeUsed,
    #[display("accounts_linked")]
    AccountsLinked,
    #[display("account_created")]
    AccountCreated,
    #[display("account_deactivated")]
    AccountDeactivated,
    #[display("ownership_transferred")]
    OwnershipTransferred,
    #[display("contact_verified")]
    ContactVerified,
    #[display("two_factor_enabled")]
    TwoFactorEnabled,
    #[display("two_factor_disabled")]
    TwoFactorDisabled,
    #[display("backup_codes_regenerated")]
    BackupCodesRegenerated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEvent {
    pub event_id: EventId,
    /// `None` when the attempt matched no record
    pub subject_id: Option<UserId>,
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Value,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, subject_id: Option<UserId>, metadata: Value) -> Self {
        Self {
            event_id: EventId::new(),
            subject_id,
            kind,
            occurred_at: Utc::now(),
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_match_serde() {
        for kind in [
            ActivityKind::SigninSuccess,
            ActivityKind::BackupCodeUsed,
            ActivityKind::AccountsLinked,
            ActivityKind::OwnershipTransferred,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{kind}\""));
        }
    }
}
