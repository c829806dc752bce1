//! Repository Traits
//!
//! Interfaces for data persistence. Implementations are in the infra layer.
//!
//! Store guarantees the core relies on:
//! - active records never share a (lower-cased) email or a phone number
//! - every write bumps `version`; `compare_and_swap` applies a batch only if
//!   every record still has the version it was read with
//! - `consume_backup_code` is a single remove-if-present

use chrono::{DateTime, Utc};
use kernel::id::{GroupId, UserId};

use crate::domain::entity::{ActivityEvent, CandidateQuery, IdentityRecord};
use crate::domain::value_object::{BackupCode, Email, PhoneNumber, ProviderAccount};
use crate::error::AuthResult;

/// Upper bound on records returned by one candidate search
pub const CANDIDATE_SCAN_LIMIT: usize = 50;

/// Result of a versioned batch write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    /// At least one record changed since it was read; nothing was written
    Conflict,
}

/// Identity record store
#[trait_variant::make(IdentityRepository: Send)]
pub trait LocalIdentityRepository {
    /// Insert a new record (`EmailTaken` / `PhoneTaken` on uniqueness violations)
    async fn create(&self, record: &IdentityRecord) -> AuthResult<()>;

    /// Find by ID regardless of status
    async fn find_by_id(&self, user_id: &UserId) -> AuthResult<Option<IdentityRecord>>;

    /// Active record whose primary email equals `email`
    async fn find_active_by_email(&self, email: &Email) -> AuthResult<Option<IdentityRecord>>;

    /// Active record whose primary phone equals `phone`
    async fn find_active_by_phone(&self, phone: &PhoneNumber)
    -> AuthResult<Option<IdentityRecord>>;

    /// Active record holding the provider account
    async fn find_active_by_provider_account(
        &self,
        account: &ProviderAccount,
    ) -> AuthResult<Option<IdentityRecord>>;

    /// Every member of a group, active or not
    async fn find_group_members(&self, group_id: &GroupId) -> AuthResult<Vec<IdentityRecord>>;

    /// Active records sharing any queried attribute (email/phone primary or
    /// linked, provider account, canonical name), minus the exclusions
    ///
    /// At most `CANDIDATE_SCAN_LIMIT` records, strongest match first (scoring
    /// weights, email vouching aside), then most recently signed in. A name
    /// hit never displaces a verified email, phone or provider hit.
    async fn find_match_candidates(
        &self,
        query: &CandidateQuery,
    ) -> AuthResult<Vec<IdentityRecord>>;

    /// Write all records atomically, each guarded by its current `version`
    async fn compare_and_swap(&self, records: &[IdentityRecord]) -> AuthResult<CasOutcome>;

    /// Remove `code` from the record's backup codes; true if this call removed it
    async fn consume_backup_code(&self, user_id: &UserId, code: &BackupCode) -> AuthResult<bool>;

    /// Stamp the last successful sign-in
    async fn record_sign_in(&self, user_id: &UserId, at: DateTime<Utc>) -> AuthResult<()>;
}

/// Audit trail
#[trait_variant::make(ActivityRepository: Send)]
pub trait LocalActivityRepository {
    async fn record(&self, event: &ActivityEvent) -> AuthResult<()>;
}
