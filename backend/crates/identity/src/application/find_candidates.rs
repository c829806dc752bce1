//! Find Link Candidates Use Case
//!
//! Records that probably belong to the same person as the caller, ranked by
//! confidence. Read-only.

use std::sync::Arc;

use kernel::id::UserId;

use crate::application::support::load_active;
use crate::domain::entity::{CandidateQuery, IdentityRecord, LinkCandidate};
use crate::domain::repository::IdentityRepository;
use crate::domain::service::scoring::score_all;
use crate::domain::value_object::{DisplayName, Email, PhoneNumber, ProviderAccount};
use crate::error::{AuthError, AuthResult};

/// Attributes to search by
#[derive(Debug, Clone, Default)]
pub struct CandidateSearch {
    pub email: Option<Email>,
    pub phone: Option<PhoneNumber>,
    pub name: Option<DisplayName>,
    pub provider_account: Option<ProviderAccount>,
    /// The email was vouched for by an OAuth provider
    pub email_vouched: bool,
}

impl CandidateSearch {
    /// Search by a record's own primary attributes
    pub fn for_record(record: &IdentityRecord) -> Self {
        Self {
            email: record.email.clone(),
            phone: record.phone_number.clone(),
            name: record.display_name.clone(),
            provider_account: None,
            email_vouched: false,
        }
    }
}

/// Find candidates use case
pub struct FindCandidatesUseCase<R>
where
    R: IdentityRepository,
{
    identity_repo: Arc<R>,
}

impl<R> FindCandidatesUseCase<R>
where
    R: IdentityRepository,
{
    pub fn new(identity_repo: Arc<R>) -> Self {
        Self { identity_repo }
    }

    /// Candidates matching the user's own primary attributes
    pub async fn for_user(&self, user_id: &UserId) -> AuthResult<Vec<LinkCandidate>> {
        let record = load_active(self.identity_repo.as_ref(), user_id).await?;
        self.execute(CandidateSearch::for_record(&record), user_id)
            .await
    }

    /// Check that `user_id` may confirm a link to every id in `secondary_ids`
    ///
    /// Records already in the caller's group pass, so a repeated confirmation
    /// reaches the merge as a no-op. Anything else must be a current
    /// candidate sharing at least one verified attribute; a name alone never
    /// qualifies.
    pub async fn check_confirmable(
        &self,
        user_id: &UserId,
        secondary_ids: &[UserId],
    ) -> AuthResult<()> {
        let record = load_active(self.identity_repo.as_ref(), user_id).await?;
        let own_group = record.group_id();

        let mut pending = Vec::new();
        for id in secondary_ids {
            let grouped = match own_group {
                Some(group_id) => self
                    .identity_repo
                    .find_by_id(id)
                    .await?
                    .is_some_and(|r| r.is_active() && r.group_id() == Some(group_id)),
                None => false,
            };
            if !grouped {
                pending.push(*id);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let offered = self
            .execute(CandidateSearch::for_record(&record), user_id)
            .await?;
        for id in &pending {
            let candidate = offered
                .iter()
                .find(|c| c.candidate_user_id == *id)
                .ok_or(AuthError::CandidateNotFound)?;
            if !candidate.matched_attributes.iter().any(|m| m.verified) {
                tracing::info!(
                    user_id = %user_id,
                    candidate_id = %id,
                    "Link refused, no verified attribute in common"
                );
                return Err(AuthError::InvalidLinkRequest(
                    "Account shares no verified identifier",
                ));
            }
        }
        Ok(())
    }

    /// Candidates for `search`, never including `exclude_user_id` or members
    /// of its group
    pub async fn execute(
        &self,
        search: CandidateSearch,
        exclude_user_id: &UserId,
    ) -> AuthResult<Vec<LinkCandidate>> {
        let exclude_group = self
            .identity_repo
            .find_by_id(exclude_user_id)
            .await?
            .and_then(|r| r.group_id());

        let query = CandidateQuery {
            email: search.email,
            phone: search.phone,
            name: search.name,
            provider_account: search.provider_account,
            exclude_user_ids: vec![*exclude_user_id],
            exclude_group,
        };
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.identity_repo.find_match_candidates(&query).await?;
        let candidates = score_all(&query, search.email_vouched, &records);

        tracing::debug!(
            user_id = %exclude_user_id,
            scanned = records.len(),
            found = candidates.len(),
            "Link candidates computed"
        );

        Ok(candidates)
    }
}
