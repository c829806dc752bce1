//! In-Memory Identity Store
//!
//! Same contract as the PostgreSQL store (active-uniqueness, versioned batch
//! writes, single-use backup codes) kept in process memory. Used by tests and
//! by local runs without a database.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use kernel::id::{GroupId, UserId};

use crate::domain::entity::{ActivityEvent, ActivityKind, CandidateQuery, IdentityRecord};
use crate::domain::repository::{
    ActivityRepository, CANDIDATE_SCAN_LIMIT, CasOutcome, IdentityRepository,
};
use crate::domain::service::scoring::score_candidate;
use crate::domain::value_object::{BackupCode, Email, PhoneNumber, ProviderAccount};
use crate::error::{AuthError, AuthResult};

#[derive(Default)]
struct StoreState {
    records: HashMap<UserId, IdentityRecord>,
    events: Vec<ActivityEvent>,
    /// Forced `Conflict` outcomes still to hand out
    pending_conflicts: u32,
    unavailable: bool,
}

/// In-memory identity and activity store
#[derive(Clone, Default)]
pub struct InMemoryIdentityStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded activity events, oldest first
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.state
            .lock()
            .map(|s| s.events.clone())
            .unwrap_or_default()
    }

    /// Recorded events of one kind
    pub fn events_of(&self, kind: ActivityKind) -> Vec<ActivityEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    /// Snapshot of one record regardless of status
    pub fn snapshot(&self, user_id: &UserId) -> Option<IdentityRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.records.get(user_id).cloned())
    }

    /// Make the next `count` batch writes report a conflict
    pub fn inject_conflicts(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.pending_conflicts = count;
        }
    }

    /// Simulate an unreachable store
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.unavailable = unavailable;
        }
    }

    fn lock(&self) -> AuthResult<MutexGuard<'_, StoreState>> {
        let state = self
            .state
            .lock()
            .map_err(|_| AuthError::Internal("Identity store lock poisoned".to_string()))?;
        if state.unavailable {
            return Err(AuthError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(state)
    }
}

impl StoreState {
    fn active(&self) -> impl Iterator<Item = &IdentityRecord> {
        self.records.values().filter(|r| r.is_active())
    }

    /// Active-uniqueness of primary email and phone, ignoring `skip`
    fn check_unique(&self, record: &IdentityRecord, skip: &[UserId]) -> AuthResult<()> {
        if !record.is_active() {
            return Ok(());
        }
        for other in self.active().filter(|o| !skip.contains(&o.user_id)) {
            if record.email.is_some() && record.email == other.email {
                return Err(AuthError::EmailTaken);
            }
            if record.phone_number.is_some() && record.phone_number == other.phone_number {
                return Err(AuthError::PhoneTaken);
            }
        }
        Ok(())
    }

    fn find_active(&self, pred: impl Fn(&IdentityRecord) -> bool) -> Option<IdentityRecord> {
        self.active().find(|r| pred(r)).cloned()
    }
}

fn matches_query(record: &IdentityRecord, query: &CandidateQuery) -> bool {
    let email_hit = query.email.as_ref().is_some_and(|email| {
        record.email.as_ref() == Some(email) || record.linked.emails.contains(email.as_str())
    });
    let phone_hit = query.phone.as_ref().is_some_and(|phone| {
        record.phone_number.as_ref() == Some(phone)
            || record.linked.phones.contains(phone.as_str())
    });
    let provider_hit = query
        .provider_account
        .as_ref()
        .is_some_and(|account| record.provider_accounts.contains(account));
    let name_hit = query.name.as_ref().is_some_and(|name| {
        record
            .display_name
            .as_ref()
            .is_some_and(|own| own.matches(name))
    });
    email_hit || phone_hit || provider_hit || name_hit
}

impl IdentityRepository for InMemoryIdentityStore {
    async fn create(&self, record: &IdentityRecord) -> AuthResult<()> {
        let mut state = self.lock()?;
        if state.records.contains_key(&record.user_id) {
            return Err(AuthError::Internal(format!(
                "Duplicate identity id: {}",
                record.user_id
            )));
        }
        state.check_unique(record, &[])?;
        state.records.insert(record.user_id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, user_id: &UserId) -> AuthResult<Option<IdentityRecord>> {
        Ok(self.lock()?.records.get(user_id).cloned())
    }

    async fn find_active_by_email(&self, email: &Email) -> AuthResult<Option<IdentityRecord>> {
        Ok(self
            .lock()?
            .find_active(|r| r.email.as_ref() == Some(email)))
    }

    async fn find_active_by_phone(
        &self,
        phone: &PhoneNumber,
    ) -> AuthResult<Option<IdentityRecord>> {
        Ok(self
            .lock()?
            .find_active(|r| r.phone_number.as_ref() == Some(phone)))
    }

    async fn find_active_by_provider_account(
        &self,
        account: &ProviderAccount,
    ) -> AuthResult<Option<IdentityRecord>> {
        Ok(self
            .lock()?
            .find_active(|r| r.provider_accounts.contains(account)))
    }

    async fn find_group_members(&self, group_id: &GroupId) -> AuthResult<Vec<IdentityRecord>> {
        let state = self.lock()?;
        let mut members: Vec<IdentityRecord> = state
            .records
            .values()
            .filter(|r| r.group_id() == Some(*group_id))
            .cloned()
            .collect();
        members.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(members)
    }

    async fn find_match_candidates(
        &self,
        query: &CandidateQuery,
    ) -> AuthResult<Vec<IdentityRecord>> {
        let state = self.lock()?;
        let mut hits: Vec<(u8, &IdentityRecord)> = state
            .active()
            .filter(|r| !query.exclude_user_ids.contains(&r.user_id))
            .filter(|r| match (query.exclude_group, r.group_id()) {
                (Some(excluded), Some(group)) => excluded != group,
                _ => true,
            })
            .filter(|r| matches_query(r, query))
            .map(|r| {
                let strength = score_candidate(query, false, r).map_or(0, |c| c.confidence);
                (strength, r)
            })
            .collect();

        hits.sort_by(|(sa, a), (sb, b)| {
            sb.cmp(sa)
                .then_with(|| b.last_sign_in_at.cmp(&a.last_sign_in_at))
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(hits
            .into_iter()
            .take(CANDIDATE_SCAN_LIMIT)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn compare_and_swap(&self, records: &[IdentityRecord]) -> AuthResult<CasOutcome> {
        let mut state = self.lock()?;

        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            return Ok(CasOutcome::Conflict);
        }

        for record in records {
            match state.records.get(&record.user_id) {
                Some(current) if current.version == record.version => {}
                _ => return Ok(CasOutcome::Conflict),
            }
        }

        let batch_ids: Vec<UserId> = records.iter().map(|r| r.user_id).collect();
        for (i, record) in records.iter().enumerate() {
            state.check_unique(record, &batch_ids)?;
            for other in records.iter().skip(i + 1) {
                if record.is_active() && other.is_active() {
                    if record.email.is_some() && record.email == other.email {
                        return Err(AuthError::EmailTaken);
                    }
                    if record.phone_number.is_some() && record.phone_number == other.phone_number
                    {
                        return Err(AuthError::PhoneTaken);
                    }
                }
            }
        }

        for record in records {
            let mut stored = record.clone();
            stored.version += 1;
            state.records.insert(stored.user_id, stored);
        }
        Ok(CasOutcome::Applied)
    }

    async fn consume_backup_code(&self, user_id: &UserId, code: &BackupCode) -> AuthResult<bool> {
        let mut state = self.lock()?;
        let Some(record) = state.records.get_mut(user_id) else {
            return Ok(false);
        };
        if !record.is_active() {
            return Ok(false);
        }
        let Some(pos) = record.two_factor.backup_codes.iter().position(|c| c == code) else {
            return Ok(false);
        };
        record.two_factor.backup_codes.remove(pos);
        record.version += 1;
        record.touch(Utc::now());
        Ok(true)
    }

    async fn record_sign_in(&self, user_id: &UserId, at: DateTime<Utc>) -> AuthResult<()> {
        let mut state = self.lock()?;
        if let Some(record) = state.records.get_mut(user_id) {
            record.last_sign_in_at = Some(at);
            record.version += 1;
            record.touch(at);
        }
        Ok(())
    }
}

impl ActivityRepository for InMemoryIdentityStore {
    async fn record(&self, event: &ActivityEvent) -> AuthResult<()> {
        self.lock()?.events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::password::ClearTextPassword;

    fn password_record(email: &str) -> IdentityRecord {
        let hash = ClearTextPassword::for_verification("pw".to_string())
            .hash(None)
            .unwrap();
        IdentityRecord::new_password(Email::new(email).unwrap(), hash, None)
    }

    #[tokio::test]
    async fn test_active_email_is_unique() {
        let store = InMemoryIdentityStore::new();
        store.create(&password_record("a@example.com")).await.unwrap();

        let err = store
            .create(&password_record("A@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::EmailTaken));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = InMemoryIdentityStore::new();
        let record = password_record("a@example.com");
        store.create(&record).await.unwrap();

        assert_eq!(
            store.compare_and_swap(&[record.clone()]).await.unwrap(),
            CasOutcome::Applied
        );
        // Same read version again is now stale
        assert_eq!(
            store.compare_and_swap(&[record.clone()]).await.unwrap(),
            CasOutcome::Conflict
        );
        assert_eq!(store.snapshot(&record.user_id).unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_backup_code_consumed_once() {
        let store = InMemoryIdentityStore::new();
        let mut record = password_record("a@example.com");
        let code = BackupCode::generate();
        record.two_factor.backup_codes = vec![code.clone()];
        store.create(&record).await.unwrap();

        assert!(store.consume_backup_code(&record.user_id, &code).await.unwrap());
        assert!(!store.consume_backup_code(&record.user_id, &code).await.unwrap());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails() {
        let store = InMemoryIdentityStore::new();
        store.set_unavailable(true);
        let err = store.find_by_id(&UserId::new()).await.unwrap_err();
        assert!(err.is_infrastructure());
    }
}
