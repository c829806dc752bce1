//! Shared Use Case Plumbing
//!
//! Group resolution, versioned single-record updates, audit writes and
//! bounded gateway calls.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use kernel::id::UserId;

use crate::domain::entity::{ActivityEvent, IdentityRecord, Principal};
use crate::domain::repository::{ActivityRepository, CasOutcome, IdentityRepository};
use crate::error::{AuthError, AuthResult};

/// Load the subject's group and build the aggregate principal
pub(crate) async fn resolve_principal<R>(
    repo: &R,
    subject: &IdentityRecord,
) -> AuthResult<Principal>
where
    R: IdentityRepository,
{
    let members = match subject.group_id() {
        Some(group_id) => repo.find_group_members(&group_id).await?,
        None => Vec::new(),
    };
    Ok(Principal::aggregate(subject, &members))
}

/// Load an active record or fail with `NotFound`
pub(crate) async fn load_active<R>(repo: &R, user_id: &UserId) -> AuthResult<IdentityRecord>
where
    R: IdentityRepository,
{
    repo.find_by_id(user_id)
        .await?
        .filter(|r| r.is_active())
        .ok_or(AuthError::NotFound)
}

/// Read-modify-write one active record under its version
///
/// `mutate` runs against a fresh read on every attempt. An unchanged record
/// is returned without a write.
pub(crate) async fn update_with_retry<R, F>(
    repo: &R,
    user_id: &UserId,
    max_attempts: u32,
    mut mutate: F,
) -> AuthResult<IdentityRecord>
where
    R: IdentityRepository,
    F: FnMut(&mut IdentityRecord) -> AuthResult<()>,
{
    for attempt in 1..=max_attempts.max(1) {
        let mut record = load_active(repo, user_id).await?;
        let before = record.clone();
        mutate(&mut record)?;
        if record == before {
            return Ok(record);
        }
        record.touch(Utc::now());

        match repo.compare_and_swap(std::slice::from_ref(&record)).await? {
            CasOutcome::Applied => {
                record.version += 1;
                return Ok(record);
            }
            CasOutcome::Conflict => {
                tracing::warn!(user_id = %user_id, attempt, "Version conflict, retrying update");
            }
        }
    }
    Err(AuthError::StoreConflict)
}

/// Read-modify-write one active record together with its active group
/// members, as a single versioned batch
///
/// `subject` mutates the record itself and `member` every other active
/// member. Records left unchanged are not written. Returns the subject.
pub(crate) async fn update_group_with_retry<R, F, G>(
    repo: &R,
    user_id: &UserId,
    max_attempts: u32,
    mut subject: F,
    mut member: G,
) -> AuthResult<IdentityRecord>
where
    R: IdentityRepository,
    F: FnMut(&mut IdentityRecord),
    G: FnMut(&mut IdentityRecord),
{
    for attempt in 1..=max_attempts.max(1) {
        let mut record = load_active(repo, user_id).await?;
        let members: Vec<IdentityRecord> = match record.group_id() {
            Some(group_id) => repo
                .find_group_members(&group_id)
                .await?
                .into_iter()
                .filter(|m| m.is_active() && m.user_id != *user_id)
                .collect(),
            None => Vec::new(),
        };

        let now = Utc::now();
        let mut batch = Vec::with_capacity(members.len() + 1);

        let before = record.clone();
        subject(&mut record);
        let subject_changed = record != before;
        if subject_changed {
            record.touch(now);
            batch.push(record.clone());
        }
        for mut other in members {
            let before = other.clone();
            member(&mut other);
            if other != before {
                other.touch(now);
                batch.push(other);
            }
        }
        if batch.is_empty() {
            return Ok(record);
        }

        match repo.compare_and_swap(&batch).await? {
            CasOutcome::Applied => {
                if subject_changed {
                    record.version += 1;
                }
                return Ok(record);
            }
            CasOutcome::Conflict => {
                tracing::warn!(
                    user_id = %user_id,
                    attempt,
                    members = batch.len(),
                    "Version conflict, retrying group update"
                );
            }
        }
    }
    Err(AuthError::StoreConflict)
}

/// Append an audit event; a failed write is logged and never fails the caller
pub(crate) async fn record_activity<A>(repo: &A, event: ActivityEvent)
where
    A: ActivityRepository,
{
    if let Err(e) = repo.record(&event).await {
        tracing::error!(
            kind = %event.kind,
            event_id = %event.event_id,
            error = %e,
            "Failed to record activity event"
        );
    }
}

/// Run a gateway call under a deadline; `Ok(None)` on timeout
pub(crate) async fn within<T, Fut>(
    limit: Duration,
    operation: &'static str,
    call: Fut,
) -> AuthResult<Option<T>>
where
    Fut: Future<Output = AuthResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map(Some),
        Err(_) => {
            tracing::warn!(
                operation,
                timeout_ms = limit.as_millis() as u64,
                "Gateway call timed out"
            );
            Ok(None)
        }
    }
}
