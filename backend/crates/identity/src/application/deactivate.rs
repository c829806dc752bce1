//! Deactivate Account Use Case
//!
//! Records are never deleted. Deactivating the master of a group that still
//! has other active members requires handing ownership to one of them; the
//! promotion and the deactivation are written in one versioned batch.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::UserId;
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::support::{load_active, record_activity};
use crate::domain::entity::{ActivityEvent, ActivityKind, GroupMembership, IdentityRecord};
use crate::domain::repository::{ActivityRepository, CasOutcome, IdentityRepository};
use crate::domain::value_object::AccountStatus;
use crate::error::{AuthError, AuthResult};

/// Deactivation options
#[derive(Debug, Clone, Copy, Default)]
pub struct DeactivateOptions {
    /// Hand the master role to another active member first
    pub transfer_ownership: bool,
    /// Explicit new master; defaults to the longest-standing active member.
    /// Naming a target implies `transfer_ownership`.
    pub transfer_to: Option<UserId>,
}

/// Deactivation output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeactivateOutput {
    pub user_id: UserId,
    /// Member promoted to master, if ownership moved
    pub new_master_id: Option<UserId>,
}

/// Deactivate account use case
pub struct DeactivateAccountUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    config: Arc<IdentityConfig>,
}

impl<R, A> DeactivateAccountUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    pub fn new(identity_repo: Arc<R>, activity_repo: Arc<A>, config: Arc<IdentityConfig>) -> Self {
        Self {
            identity_repo,
            activity_repo,
            config,
        }
    }

    pub async fn execute(
        &self,
        user_id: &UserId,
        options: DeactivateOptions,
    ) -> AuthResult<DeactivateOutput> {
        for attempt in 1..=self.config.merge_max_attempts.max(1) {
            let record = load_active(self.identity_repo.as_ref(), user_id).await?;
            let (batch, new_master_id) = self.plan(record, options).await?;

            match self.identity_repo.compare_and_swap(&batch).await? {
                CasOutcome::Applied => {
                    self.audit(user_id, new_master_id).await;
                    return Ok(DeactivateOutput {
                        user_id: *user_id,
                        new_master_id,
                    });
                }
                CasOutcome::Conflict => {
                    tracing::warn!(user_id = %user_id, attempt, "Deactivation conflict, retrying");
                }
            }
        }
        Err(AuthError::StoreConflict)
    }

    /// Records to write and the promoted member, if any
    async fn plan(
        &self,
        mut record: IdentityRecord,
        options: DeactivateOptions,
    ) -> AuthResult<(Vec<IdentityRecord>, Option<UserId>)> {
        let now = Utc::now();
        let group = record.group;

        record.account_status = AccountStatus::Deactivated;
        record.touch(now);

        let Some(membership) = group.filter(|g| g.is_master) else {
            return Ok((vec![record], None));
        };
        record.group = Some(GroupMembership {
            group_id: membership.group_id,
            is_master: false,
        });

        let mut others: Vec<IdentityRecord> = self
            .identity_repo
            .find_group_members(&membership.group_id)
            .await?
            .into_iter()
            .filter(|m| m.is_active() && m.user_id != record.user_id)
            .collect();
        if others.is_empty() {
            return Ok((vec![record], None));
        }
        others.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });

        if !options.transfer_ownership && options.transfer_to.is_none() {
            return Err(AuthError::RequiresTransfer {
                active_members: others.iter().map(|m| m.user_id).collect(),
            });
        }

        let position = match options.transfer_to {
            Some(target) => others
                .iter()
                .position(|m| m.user_id == target)
                .ok_or(AuthError::InvalidTransferTarget)?,
            None => 0,
        };
        let mut target = others.swap_remove(position);
        target.group = Some(GroupMembership {
            group_id: membership.group_id,
            is_master: true,
        });
        target.touch(now);

        let new_master_id = target.user_id;
        Ok((vec![target, record], Some(new_master_id)))
    }

    async fn audit(&self, user_id: &UserId, new_master_id: Option<UserId>) {
        tracing::info!(
            user_id = %user_id,
            new_master_id = ?new_master_id,
            "Account deactivated"
        );
        if let Some(new_master_id) = new_master_id {
            record_activity(
                self.activity_repo.as_ref(),
                ActivityEvent::new(
                    ActivityKind::OwnershipTransferred,
                    Some(*user_id),
                    json!({ "from": user_id, "to": new_master_id }),
                ),
            )
            .await;
        }
        record_activity(
            self.activity_repo.as_ref(),
            ActivityEvent::new(
                ActivityKind::AccountDeactivated,
                Some(*user_id),
                json!({ "ownershipTransferredTo": new_master_id }),
            ),
        )
        .await;
    }
}
