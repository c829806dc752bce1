//! PostgreSQL Repository Implementations

use chrono::{DateTime, Utc};
use kernel::id::{GroupId, UserId};
use platform::password::HashedPassword;
use sqlx::PgPool;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::entity::{
    ActivityEvent, CandidateQuery, GroupMembership, IdentityRecord, LinkedIdentifiers, TwoFactor,
};
use crate::domain::repository::{
    ActivityRepository, CANDIDATE_SCAN_LIMIT, CasOutcome, IdentityRepository,
};
use crate::domain::service::scoring::{
    NAME_WEIGHT, PROVIDER_ACCOUNT_WEIGHT, VERIFIED_EMAIL_WEIGHT, VERIFIED_PHONE_WEIGHT,
};
use crate::domain::value_object::{
    AccountStatus, BackupCode, DisplayName, Email, PhoneNumber, ProviderAccount,
    RegistrationOrigin, TotpSecret,
};
use crate::error::{AuthError, AuthResult};

const EMAIL_UNIQUE_INDEX: &str = "identities_email_active_key";
const PHONE_UNIQUE_INDEX: &str = "identities_phone_active_key";

const SELECT_IDENTITY: &str = r#"
    SELECT
        user_id,
        email,
        phone_number,
        display_name,
        display_name_canonical,
        image_url,
        password_hash,
        registration_origin,
        provider_accounts,
        totp_secret,
        totp_enabled,
        backup_codes,
        linked_emails,
        linked_phones,
        linked_providers,
        verified_emails,
        verified_phones,
        group_id,
        is_master,
        account_status,
        version,
        created_at,
        updated_at,
        last_sign_in_at
    FROM identities
"#;

/// PostgreSQL-backed identity repository
#[derive(Clone)]
pub struct PgIdentityRepository {
    pool: PgPool,
}

impl PgIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_one(&self, filter: &str, value: &str) -> AuthResult<Option<IdentityRecord>> {
        let sql = format!("{SELECT_IDENTITY} WHERE account_status = 0 AND {filter}");
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_record()).transpose()
    }
}

/// Uniqueness violations on the active email / phone indexes
fn map_unique_violation(e: sqlx::Error) -> AuthError {
    if let sqlx::Error::Database(db) = &e {
        match db.constraint() {
            Some(EMAIL_UNIQUE_INDEX) => return AuthError::EmailTaken,
            Some(PHONE_UNIQUE_INDEX) => return AuthError::PhoneTaken,
            _ => {}
        }
    }
    AuthError::Database(e)
}

fn to_vec(set: &BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

// ============================================================================
// Identity Repository Implementation
// ============================================================================

impl IdentityRepository for PgIdentityRepository {
    async fn create(&self, record: &IdentityRecord) -> AuthResult<()> {
        let providers: Vec<String> = record
            .provider_accounts
            .iter()
            .map(|a| a.to_storage())
            .collect();
        let backup_codes: Vec<String> = record
            .two_factor
            .backup_codes
            .iter()
            .map(|c| c.as_str().to_string())
            .collect();

        sqlx::query(
            r#"
            INSERT INTO identities (
                user_id,
                email,
                phone_number,
                display_name,
                display_name_canonical,
                image_url,
                password_hash,
                registration_origin,
                provider_accounts,
                totp_secret,
                totp_enabled,
                backup_codes,
                linked_emails,
                linked_phones,
                linked_providers,
                verified_emails,
                verified_phones,
                group_id,
                is_master,
                account_status,
                version,
                created_at,
                updated_at,
                last_sign_in_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
            )
            "#,
        )
        .bind(record.user_id.as_uuid())
        .bind(record.email.as_ref().map(|e| e.as_str()))
        .bind(record.phone_number.as_ref().map(|p| p.as_str()))
        .bind(record.display_name.as_ref().map(|n| n.original()))
        .bind(record.display_name.as_ref().map(|n| n.canonical()))
        .bind(record.image_url.as_deref())
        .bind(record.password_hash.as_ref().map(|h| h.as_phc_string()))
        .bind(record.registration_origin.code())
        .bind(&providers)
        .bind(record.two_factor.secret.as_ref().map(|s| s.as_base32()))
        .bind(record.two_factor.enabled)
        .bind(&backup_codes)
        .bind(to_vec(&record.linked.emails))
        .bind(to_vec(&record.linked.phones))
        .bind(to_vec(&record.linked.providers))
        .bind(to_vec(&record.linked.verified_emails))
        .bind(to_vec(&record.linked.verified_phones))
        .bind(record.group_id().map(|g| g.into_uuid()))
        .bind(record.is_master())
        .bind(record.account_status.id())
        .bind(record.version)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.last_sign_in_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn find_by_id(&self, user_id: &UserId) -> AuthResult<Option<IdentityRecord>> {
        let sql = format!("{SELECT_IDENTITY} WHERE user_id = $1");
        let row = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(user_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_record()).transpose()
    }

    async fn find_active_by_email(&self, email: &Email) -> AuthResult<Option<IdentityRecord>> {
        self.find_one("lower(email) = $1", email.as_str()).await
    }

    async fn find_active_by_phone(
        &self,
        phone: &PhoneNumber,
    ) -> AuthResult<Option<IdentityRecord>> {
        self.find_one("phone_number = $1", phone.as_str()).await
    }

    async fn find_active_by_provider_account(
        &self,
        account: &ProviderAccount,
    ) -> AuthResult<Option<IdentityRecord>> {
        self.find_one("$1 = ANY(provider_accounts)", &account.to_storage())
            .await
    }

    async fn find_group_members(&self, group_id: &GroupId) -> AuthResult<Vec<IdentityRecord>> {
        let sql = format!("{SELECT_IDENTITY} WHERE group_id = $1 ORDER BY created_at, user_id");
        let rows = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(group_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn find_match_candidates(
        &self,
        query: &CandidateQuery,
    ) -> AuthResult<Vec<IdentityRecord>> {
        let excluded: Vec<Uuid> = query
            .exclude_user_ids
            .iter()
            .map(|id| id.into_uuid())
            .collect();

        let sql = format!(
            r#"{SELECT_IDENTITY}
            WHERE account_status = 0
              AND NOT (user_id = ANY($1))
              AND ($2::uuid IS NULL OR group_id IS NULL OR group_id <> $2)
              AND (
                   ($3::text IS NOT NULL AND (lower(email) = $3 OR $3 = ANY(linked_emails)))
                OR ($4::text IS NOT NULL AND (phone_number = $4 OR $4 = ANY(linked_phones)))
                OR ($5::text IS NOT NULL AND $5 = ANY(provider_accounts))
                OR ($6::text IS NOT NULL AND display_name_canonical = $6)
              )
            ORDER BY
                (CASE WHEN $3::text IS NOT NULL AND $3 = ANY(verified_emails) THEN $8::int4 ELSE 0 END
               + CASE WHEN $4::text IS NOT NULL AND $4 = ANY(verified_phones) THEN $9::int4 ELSE 0 END
               + CASE WHEN $5::text IS NOT NULL AND $5 = ANY(provider_accounts) THEN $10::int4 ELSE 0 END
               + CASE WHEN $6::text IS NOT NULL AND display_name_canonical = $6 THEN $11::int4 ELSE 0 END
                ) DESC,
                last_sign_in_at DESC NULLS LAST,
                user_id
            LIMIT $7
            "#
        );
        let rows = sqlx::query_as::<_, IdentityRow>(&sql)
            .bind(&excluded)
            .bind(query.exclude_group.map(|g| g.into_uuid()))
            .bind(query.email.as_ref().map(|e| e.as_str()))
            .bind(query.phone.as_ref().map(|p| p.as_str()))
            .bind(query.provider_account.as_ref().map(|a| a.to_storage()))
            .bind(query.name.as_ref().map(|n| n.canonical()))
            .bind(CANDIDATE_SCAN_LIMIT as i64)
            .bind(i32::from(VERIFIED_EMAIL_WEIGHT))
            .bind(i32::from(VERIFIED_PHONE_WEIGHT))
            .bind(i32::from(PROVIDER_ACCOUNT_WEIGHT))
            .bind(i32::from(NAME_WEIGHT))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    async fn compare_and_swap(&self, records: &[IdentityRecord]) -> AuthResult<CasOutcome> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let providers: Vec<String> = record
                .provider_accounts
                .iter()
                .map(|a| a.to_storage())
                .collect();
            let backup_codes: Vec<String> = record
                .two_factor
                .backup_codes
                .iter()
                .map(|c| c.as_str().to_string())
                .collect();

            let result = sqlx::query(
                r#"
                UPDATE identities SET
                    email = $3,
                    phone_number = $4,
                    display_name = $5,
                    display_name_canonical = $6,
                    image_url = $7,
                    password_hash = $8,
                    provider_accounts = $9,
                    totp_secret = $10,
                    totp_enabled = $11,
                    backup_codes = $12,
                    linked_emails = $13,
                    linked_phones = $14,
                    linked_providers = $15,
                    verified_emails = $16,
                    verified_phones = $17,
                    group_id = $18,
                    is_master = $19,
                    account_status = $20,
                    updated_at = $21,
                    last_sign_in_at = $22,
                    version = version + 1
                WHERE user_id = $1 AND version = $2
                "#,
            )
            .bind(record.user_id.as_uuid())
            .bind(record.version)
            .bind(record.email.as_ref().map(|e| e.as_str()))
            .bind(record.phone_number.as_ref().map(|p| p.as_str()))
            .bind(record.display_name.as_ref().map(|n| n.original()))
            .bind(record.display_name.as_ref().map(|n| n.canonical()))
            .bind(record.image_url.as_deref())
            .bind(record.password_hash.as_ref().map(|h| h.as_phc_string()))
            .bind(&providers)
            .bind(record.two_factor.secret.as_ref().map(|s| s.as_base32()))
            .bind(record.two_factor.enabled)
            .bind(&backup_codes)
            .bind(to_vec(&record.linked.emails))
            .bind(to_vec(&record.linked.phones))
            .bind(to_vec(&record.linked.providers))
            .bind(to_vec(&record.linked.verified_emails))
            .bind(to_vec(&record.linked.verified_phones))
            .bind(record.group_id().map(|g| g.into_uuid()))
            .bind(record.is_master())
            .bind(record.account_status.id())
            .bind(record.updated_at)
            .bind(record.last_sign_in_at)
            .execute(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

            if result.rows_affected() != 1 {
                tx.rollback().await?;
                tracing::debug!(user_id = %record.user_id, version = record.version, "Version check failed");
                return Ok(CasOutcome::Conflict);
            }
        }

        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn consume_backup_code(&self, user_id: &UserId, code: &BackupCode) -> AuthResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE identities SET
                backup_codes = array_remove(backup_codes, $2),
                version = version + 1,
                updated_at = NOW()
            WHERE user_id = $1
              AND account_status = 0
              AND $2 = ANY(backup_codes)
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(code.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_sign_in(&self, user_id: &UserId, at: DateTime<Utc>) -> AuthResult<()> {
        sqlx::query(
            r#"
            UPDATE identities SET
                last_sign_in_at = $2,
                updated_at = $2,
                version = version + 1
            WHERE user_id = $1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Activity Repository Implementation
// ============================================================================

impl ActivityRepository for PgIdentityRepository {
    async fn record(&self, event: &ActivityEvent) -> AuthResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activity_events (
                event_id,
                subject_id,
                kind,
                occurred_at,
                metadata
            ) VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(event.event_id.as_uuid())
        .bind(event.subject_id.map(|id| id.into_uuid()))
        .bind(event.kind.to_string())
        .bind(event.occurred_at)
        .bind(&event.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct IdentityRow {
    user_id: Uuid,
    email: Option<String>,
    phone_number: Option<String>,
    display_name: Option<String>,
    display_name_canonical: Option<String>,
    image_url: Option<String>,
    password_hash: Option<String>,
    registration_origin: String,
    provider_accounts: Vec<String>,
    totp_secret: Option<String>,
    totp_enabled: bool,
    backup_codes: Vec<String>,
    linked_emails: Vec<String>,
    linked_phones: Vec<String>,
    linked_providers: Vec<String>,
    verified_emails: Vec<String>,
    verified_phones: Vec<String>,
    group_id: Option<Uuid>,
    is_master: bool,
    account_status: i16,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_sign_in_at: Option<DateTime<Utc>>,
}

impl IdentityRow {
    fn into_record(self) -> AuthResult<IdentityRecord> {
        let password_hash = self
            .password_hash
            .map(HashedPassword::from_phc_string)
            .transpose()
            .map_err(|e| AuthError::Internal(format!("Invalid password hash: {}", e)))?;

        let registration_origin = RegistrationOrigin::from_code(&self.registration_origin)
            .ok_or_else(|| {
                AuthError::Internal(format!(
                    "Invalid registration origin: {}",
                    self.registration_origin
                ))
            })?;

        let provider_accounts = self
            .provider_accounts
            .iter()
            .map(|s| {
                ProviderAccount::from_storage(s)
                    .ok_or_else(|| AuthError::Internal(format!("Invalid provider account: {}", s)))
            })
            .collect::<AuthResult<BTreeSet<_>>>()?;

        let secret = self.totp_secret.map(TotpSecret::from_base32).transpose()?;

        let display_name = match (self.display_name, self.display_name_canonical) {
            (Some(original), Some(canonical)) => Some(DisplayName::from_db(original, canonical)),
            (Some(original), None) => DisplayName::new(original),
            _ => None,
        };

        let group = self.group_id.map(|g| GroupMembership {
            group_id: GroupId::from(g),
            is_master: self.is_master,
        });

        Ok(IdentityRecord {
            user_id: UserId::from(self.user_id),
            email: self.email.map(Email::from_db),
            phone_number: self.phone_number.map(PhoneNumber::from_db),
            display_name,
            image_url: self.image_url,
            password_hash,
            registration_origin,
            provider_accounts,
            two_factor: TwoFactor {
                secret,
                enabled: self.totp_enabled,
                backup_codes: self.backup_codes.into_iter().map(BackupCode::from_db).collect(),
            },
            linked: LinkedIdentifiers {
                emails: self.linked_emails.into_iter().collect(),
                phones: self.linked_phones.into_iter().collect(),
                providers: self.linked_providers.into_iter().collect(),
                verified_emails: self.verified_emails.into_iter().collect(),
                verified_phones: self.verified_phones.into_iter().collect(),
            },
            group,
            account_status: AccountStatus::from_id(self.account_status).unwrap_or_default(),
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_sign_in_at: self.last_sign_in_at,
        })
    }
}
