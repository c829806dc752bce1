//! Contact Verification Use Case
//!
//! Proves control of an email address or phone number with a one-time code.
//! A confirmed destination is written to the linked and verified sets of
//! every active member of the caller's group, so the proof is visible from
//! any of the group's records.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::UserId;
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::support::{load_active, record_activity, resolve_principal, within};
use crate::domain::entity::{ActivityEvent, ActivityKind, Destination, IdentityRecord, Principal};
use crate::domain::gateway::VerificationGateway;
use crate::domain::repository::{ActivityRepository, CasOutcome, IdentityRepository};
use crate::error::{AuthError, AuthResult};

/// Contact verification use case
pub struct ContactVerificationUseCase<R, A, V>
where
    R: IdentityRepository,
    A: ActivityRepository,
    V: VerificationGateway,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    verification: Arc<V>,
    config: Arc<IdentityConfig>,
}

impl<R, A, V> ContactVerificationUseCase<R, A, V>
where
    R: IdentityRepository,
    A: ActivityRepository,
    V: VerificationGateway,
{
    pub fn new(
        identity_repo: Arc<R>,
        activity_repo: Arc<A>,
        verification: Arc<V>,
        config: Arc<IdentityConfig>,
    ) -> Self {
        Self {
            identity_repo,
            activity_repo,
            verification,
            config,
        }
    }

    /// Deliver a fresh code; a timed-out delivery is a gateway failure
    pub async fn send_code(&self, destination: &Destination) -> AuthResult<()> {
        within(
            self.config.gateway_timeout,
            "send_code",
            self.verification.send_code(destination),
        )
        .await?
        .ok_or_else(|| AuthError::Gateway("Code delivery timed out".to_string()))?;

        tracing::info!(
            kind = destination.kind(),
            destination = %destination.masked(),
            "Verification code sent"
        );
        Ok(())
    }

    /// Check the code and record the destination as verified
    pub async fn confirm(
        &self,
        user_id: &UserId,
        destination: &Destination,
        code: &str,
    ) -> AuthResult<Principal> {
        let code = code.trim();
        if code.is_empty() {
            return Err(AuthError::MissingCredentials("code"));
        }
        load_active(self.identity_repo.as_ref(), user_id).await?;

        let valid = within(
            self.config.gateway_timeout,
            "check_code",
            self.verification.check_code(destination, code),
        )
        .await?
        .unwrap_or(false);
        if !valid {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        for attempt in 1..=self.config.merge_max_attempts.max(1) {
            let subject = load_active(self.identity_repo.as_ref(), user_id).await?;
            let batch = self.plan(&subject, destination).await?;
            if batch.is_empty() {
                return resolve_principal(self.identity_repo.as_ref(), &subject).await;
            }

            match self.identity_repo.compare_and_swap(&batch).await? {
                CasOutcome::Applied => {
                    tracing::info!(
                        user_id = %user_id,
                        kind = destination.kind(),
                        members = batch.len(),
                        "Contact verified"
                    );
                    record_activity(
                        self.activity_repo.as_ref(),
                        ActivityEvent::new(
                            ActivityKind::ContactVerified,
                            Some(*user_id),
                            json!({
                                "kind": destination.kind(),
                                "destination": destination.masked(),
                            }),
                        ),
                    )
                    .await;
                    let subject = load_active(self.identity_repo.as_ref(), user_id).await?;
                    return resolve_principal(self.identity_repo.as_ref(), &subject).await;
                }
                CasOutcome::Conflict => {
                    tracing::warn!(
                        user_id = %user_id,
                        attempt,
                        "Verification write conflict, retrying"
                    );
                }
            }
        }
        Err(AuthError::StoreConflict)
    }

    /// Changed records: the subject plus its active group members
    async fn plan(
        &self,
        subject: &IdentityRecord,
        destination: &Destination,
    ) -> AuthResult<Vec<IdentityRecord>> {
        let mut records: Vec<IdentityRecord> = match subject.group_id() {
            Some(group_id) => self
                .identity_repo
                .find_group_members(&group_id)
                .await?
                .into_iter()
                .filter(|m| m.is_active() && m.user_id != subject.user_id)
                .collect(),
            None => Vec::new(),
        };
        records.push(subject.clone());

        let now = Utc::now();
        let mut batch = Vec::with_capacity(records.len());
        for mut record in records {
            let before = record.linked.clone();
            record.mark_verified(destination);
            if record.linked != before {
                record.touch(now);
                batch.push(record);
            }
        }
        Ok(batch)
    }
}
