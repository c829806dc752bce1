//! Link Accounts Use Case
//!
//! Two entry points over one merge routine:
//! - `link_accounts`: user-confirmed, always merges, primary is forced master
//! - `auto_link_if_confident`: merges with the single best candidate only if
//!   it clears the threshold; otherwise writes nothing
//!
//! The merge is planned from fresh reads and written as one versioned batch.
//! A version conflict replans from scratch, bounded by `merge_max_attempts`.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use kernel::id::{GroupId, UserId};
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::find_candidates::{CandidateSearch, FindCandidatesUseCase};
use crate::application::support::{load_active, record_activity};
use crate::domain::entity::{ActivityEvent, ActivityKind, IdentityRecord};
use crate::domain::repository::{ActivityRepository, CasOutcome, IdentityRepository};
use crate::domain::service::merge::{MasterSelection, MergePlan, plan_merge};
use crate::domain::service::scoring::best_above;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    Linked {
        group_id: GroupId,
        master_id: UserId,
        member_ids: Vec<UserId>,
    },
    /// Everyone already shared a group; nothing was written
    AlreadyLinked { group_id: GroupId },
}

impl LinkOutcome {
    pub fn group_id(&self) -> GroupId {
        match self {
            LinkOutcome::Linked { group_id, .. } | LinkOutcome::AlreadyLinked { group_id } => {
                *group_id
            }
        }
    }
}

/// Link accounts use case
pub struct LinkAccountsUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    finder: FindCandidatesUseCase<R>,
    config: Arc<IdentityConfig>,
}

impl<R, A> LinkAccountsUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    pub fn new(identity_repo: Arc<R>, activity_repo: Arc<A>, config: Arc<IdentityConfig>) -> Self {
        Self {
            finder: FindCandidatesUseCase::new(identity_repo.clone()),
            identity_repo,
            activity_repo,
            config,
        }
    }

    /// User-confirmed link with `primary_id` as master
    pub async fn link_accounts(
        &self,
        primary_id: &UserId,
        secondary_ids: &[UserId],
    ) -> AuthResult<LinkOutcome> {
        if secondary_ids.is_empty() {
            return Err(AuthError::InvalidLinkRequest("no accounts to link"));
        }
        if secondary_ids.contains(primary_id) {
            return Err(AuthError::InvalidLinkRequest(
                "an account cannot be linked to itself",
            ));
        }

        let mut ids = vec![*primary_id];
        let mut seen = BTreeSet::new();
        ids.extend(secondary_ids.iter().copied().filter(|id| seen.insert(*id)));

        self.merge(&ids, MasterSelection::Forced(*primary_id), "confirmed")
            .await
    }

    /// Merge with the best candidate when it clears `min_confidence`
    ///
    /// The configured auto-link threshold is a floor for `min_confidence`.
    /// `Ok(None)` means nothing qualified and nothing was written.
    pub async fn auto_link_if_confident(
        &self,
        subject_id: &UserId,
        search: CandidateSearch,
        min_confidence: u8,
    ) -> AuthResult<Option<LinkOutcome>> {
        let threshold = min_confidence.max(self.config.auto_link_threshold);
        let candidates = self.finder.execute(search, subject_id).await?;

        let Some(best) = best_above(&candidates, threshold) else {
            tracing::debug!(
                user_id = %subject_id,
                threshold,
                top = candidates.first().map(|c| c.confidence),
                "No candidate qualifies for auto-link"
            );
            return Ok(None);
        };

        tracing::info!(
            user_id = %subject_id,
            candidate_id = %best.candidate_user_id,
            confidence = best.confidence,
            "Auto-linking confident candidate"
        );

        let ids = [*subject_id, best.candidate_user_id];
        let selection = MasterSelection::Auto {
            subject: *subject_id,
        };
        self.merge(&ids, selection, "auto").await.map(Some)
    }

    async fn merge(
        &self,
        ids: &[UserId],
        selection: MasterSelection,
        trigger: &'static str,
    ) -> AuthResult<LinkOutcome> {
        for attempt in 1..=self.config.merge_max_attempts.max(1) {
            let participants = self.load_participants(ids).await?;
            let members = self.load_group_members(&participants).await?;

            let plan = plan_merge(
                &participants,
                &members,
                selection,
                GroupId::new(),
                Utc::now(),
            )?;

            let (group_id, master_id, records, member_ids) = match plan {
                MergePlan::AlreadyLinked { group_id } => {
                    tracing::debug!(group_id = %group_id, "Accounts already linked");
                    return Ok(LinkOutcome::AlreadyLinked { group_id });
                }
                MergePlan::Merge {
                    group_id,
                    master_id,
                    records,
                    member_ids,
                } => (group_id, master_id, records, member_ids),
            };

            match self.identity_repo.compare_and_swap(&records).await? {
                CasOutcome::Applied => {
                    let affected: Vec<String> =
                        records.iter().map(|r| r.user_id.to_string()).collect();
                    tracing::info!(
                        group_id = %group_id,
                        master_id = %master_id,
                        members = member_ids.len(),
                        trigger,
                        "Accounts linked"
                    );
                    record_activity(
                        self.activity_repo.as_ref(),
                        ActivityEvent::new(
                            ActivityKind::AccountsLinked,
                            Some(master_id),
                            json!({
                                "groupId": group_id,
                                "masterId": master_id,
                                "affectedIds": affected,
                                "trigger": trigger,
                            }),
                        ),
                    )
                    .await;
                    return Ok(LinkOutcome::Linked {
                        group_id,
                        master_id,
                        member_ids,
                    });
                }
                CasOutcome::Conflict => {
                    tracing::warn!(attempt, group_id = %group_id, "Merge conflict, replanning");
                }
            }
        }

        tracing::warn!(trigger, "Merge retries exhausted");
        Err(AuthError::StoreConflict)
    }

    /// First id is the subject (`NotFound`), the rest are candidates
    /// (`CandidateNotFound`)
    async fn load_participants(&self, ids: &[UserId]) -> AuthResult<Vec<IdentityRecord>> {
        let mut participants = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let record = match load_active(self.identity_repo.as_ref(), id).await {
                Err(AuthError::NotFound) if index > 0 => Err(AuthError::CandidateNotFound),
                other => other,
            }?;
            participants.push(record);
        }
        Ok(participants)
    }

    async fn load_group_members(
        &self,
        participants: &[IdentityRecord],
    ) -> AuthResult<Vec<IdentityRecord>> {
        let groups: BTreeSet<GroupId> = participants.iter().filter_map(|p| p.group_id()).collect();
        let mut members = Vec::new();
        for group_id in groups {
            members.extend(self.identity_repo.find_group_members(&group_id).await?);
        }
        Ok(members)
    }
}
