//! Verify Credential Use Case
//!
//! Proves that a credential belongs to an identity record. One path per
//! sign-in method; never retries and never links.

use std::sync::Arc;

use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::second_factor::{SecondFactor, verify_second_factor};
use crate::application::support::{record_activity, update_group_with_retry, within};
use crate::domain::entity::{ActivityEvent, ActivityKind, Destination, IdentityRecord};
use crate::domain::gateway::VerificationGateway;
use crate::domain::repository::{ActivityRepository, IdentityRepository};
use crate::domain::value_object::{
    Credential, DisplayName, EmailCredential, OAuthCredential, PhoneCredential, ProviderAccount,
};
use crate::error::{AuthError, AuthResult};

/// A credential that proved an identity
#[derive(Debug, Clone)]
pub struct VerifiedCredential {
    pub record: IdentityRecord,
    /// Second factor used, for password sign-ins with 2FA enabled
    pub second_factor: Option<SecondFactor>,
    /// The record was created by this sign-in (first OAuth sign-in)
    pub created: bool,
}

impl VerifiedCredential {
    fn existing(record: IdentityRecord) -> Self {
        Self {
            record,
            second_factor: None,
            created: false,
        }
    }
}

/// Verify credential use case
pub struct VerifyCredentialUseCase<R, A, V>
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

impl<R, A, V> VerifyCredentialUseCase<R, A, V>
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

    pub async fn execute(&self, credential: Credential) -> AuthResult<VerifiedCredential> {
        match credential {
            Credential::Email(c) => self.verify_password(c).await,
            Credential::Phone(c) => self.verify_phone(c).await,
            Credential::OAuth(c) => self.resolve_oauth(c).await,
        }
    }

    async fn verify_password(&self, credential: EmailCredential) -> AuthResult<VerifiedCredential> {
        if credential.password.is_empty() {
            return Err(AuthError::MissingCredentials("password"));
        }

        let record = self
            .identity_repo
            .find_active_by_email(&credential.email)
            .await?
            .ok_or(AuthError::NotFound)?;

        let Some(hash) = &record.password_hash else {
            return Err(match record.registration_origin.oauth_provider() {
                Some(provider) => AuthError::WrongProvider(provider),
                None => AuthError::InvalidCredential,
            });
        };

        if !hash.verify(&credential.password, self.config.pepper()) {
            return Err(AuthError::InvalidCredential);
        }

        if hash.needs_rehash() {
            tracing::debug!(user_id = %record.user_id, "Password hash uses outdated parameters");
        }

        if !record.two_factor.enabled {
            return Ok(VerifiedCredential::existing(record));
        }

        let factor = verify_second_factor(
            self.identity_repo.as_ref(),
            &self.config,
            &record,
            credential.two_factor_code.as_deref(),
            true,
        )
        .await?;

        if factor == SecondFactor::BackupCode {
            let remaining = record.two_factor.backup_codes.len().saturating_sub(1);
            tracing::info!(user_id = %record.user_id, remaining, "Backup code consumed");
            record_activity(
                self.activity_repo.as_ref(),
                ActivityEvent::new(
                    ActivityKind::BackupCodeUsed,
                    Some(record.user_id),
                    json!({ "remaining": remaining }),
                ),
            )
            .await;
        }

        Ok(VerifiedCredential {
            record,
            second_factor: Some(factor),
            created: false,
        })
    }

    async fn verify_phone(&self, credential: PhoneCredential) -> AuthResult<VerifiedCredential> {
        if credential.code.trim().is_empty() {
            return Err(AuthError::MissingCredentials("code"));
        }

        let record = self
            .identity_repo
            .find_active_by_phone(&credential.phone_number)
            .await?
            .ok_or(AuthError::NotFound)?;

        if !record.is_phone_verified() {
            return Err(AuthError::PhoneUnverified);
        }

        let destination = Destination::Phone(credential.phone_number);
        let valid = within(
            self.config.gateway_timeout,
            "check_code",
            self.verification
                .check_code(&destination, credential.code.trim()),
        )
        .await?
        .unwrap_or(false);

        if !valid {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        Ok(VerifiedCredential::existing(record))
    }

    /// Provider account, else primary email (attaching the provider
    /// across its group), else a new record
    async fn resolve_oauth(&self, credential: OAuthCredential) -> AuthResult<VerifiedCredential> {
        let account = ProviderAccount::new(credential.provider, credential.provider_account_id)?;

        if let Some(record) = self
            .identity_repo
            .find_active_by_provider_account(&account)
            .await?
        {
            return Ok(VerifiedCredential::existing(record));
        }

        if let Some(email) = &credential.email {
            if let Some(existing) = self.identity_repo.find_active_by_email(email).await? {
                let destination = Destination::Email(email.clone());
                let provider = account.provider().as_str().to_string();
                let image = credential.image.clone();
                let record = update_group_with_retry(
                    self.identity_repo.as_ref(),
                    &existing.user_id,
                    self.config.merge_max_attempts,
                    |record| {
                        record.attach_provider(account.clone());
                        record.mark_verified(&destination);
                        if record.image_url.is_none() {
                            record.image_url = image.clone();
                        }
                    },
                    |member| {
                        member.linked.providers.insert(provider.clone());
                        member.mark_verified(&destination);
                    },
                )
                .await?;

                tracing::info!(
                    user_id = %record.user_id,
                    provider = %account.provider(),
                    "Provider account attached by email"
                );
                record_activity(
                    self.activity_repo.as_ref(),
                    ActivityEvent::new(
                        ActivityKind::OauthLinked,
                        Some(record.user_id),
                        json!({ "provider": account.provider().as_str() }),
                    ),
                )
                .await;
                return Ok(VerifiedCredential::existing(record));
            }
        }

        let record = IdentityRecord::new_oauth(
            account,
            credential.email,
            credential.name.as_deref().and_then(DisplayName::new),
            credential.image,
        );
        self.identity_repo.create(&record).await?;

        tracing::info!(
            user_id = %record.user_id,
            provider = %credential.provider,
            "Identity created from OAuth sign-in"
        );
        record_activity(
            self.activity_repo.as_ref(),
            ActivityEvent::new(
                ActivityKind::AccountCreated,
                Some(record.user_id),
                json!({ "origin": record.registration_origin.code() }),
            ),
        )
        .await;

        Ok(VerifiedCredential {
            record,
            second_factor: None,
            created: true,
        })
    }
}
