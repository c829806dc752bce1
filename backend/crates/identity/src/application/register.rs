//! Register Use Case
//!
//! Creates a standalone identity record by email + password or by verified
//! phone. Never links; returns candidates for the caller to confirm.

use std::sync::Arc;

use platform::password::ClearTextPassword;
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::find_candidates::{CandidateSearch, FindCandidatesUseCase};
use crate::application::support::{record_activity, within};
use crate::domain::entity::{
    ActivityEvent, ActivityKind, Destination, IdentityRecord, LinkCandidate, Principal,
};
use crate::domain::gateway::VerificationGateway;
use crate::domain::repository::{ActivityRepository, IdentityRepository};
use crate::domain::value_object::{DisplayName, Email, PhoneNumber};
use crate::error::{AuthError, AuthResult};

/// Registration input
///
/// Email registration wins when both an email and a phone are given.
#[derive(Debug, Default)]
pub struct RegisterInput {
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone_number: Option<String>,
    pub phone_code: Option<String>,
    pub name: Option<String>,
}

/// Registration output
#[derive(Debug, Clone)]
pub struct RegisterOutput {
    pub principal: Principal,
    /// Possible existing accounts of the same person, for manual confirmation
    pub candidates: Vec<LinkCandidate>,
}

/// Register use case
pub struct RegisterUseCase<R, A, V>
where
    R: IdentityRepository,
    A: ActivityRepository,
    V: VerificationGateway,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    verification: Arc<V>,
    finder: FindCandidatesUseCase<R>,
    config: Arc<IdentityConfig>,
}

impl<R, A, V> RegisterUseCase<R, A, V>
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
            finder: FindCandidatesUseCase::new(identity_repo.clone()),
            identity_repo,
            activity_repo,
            verification,
            config,
        }
    }

    pub async fn execute(&self, input: RegisterInput) -> AuthResult<RegisterOutput> {
        let name = input.name.as_deref().and_then(DisplayName::new);
        let email = non_blank(input.email);
        let phone = non_blank(input.phone_number);

        let record = match (email, phone) {
            (Some(email), _) => self.password_record(&email, input.password, name).await?,
            (None, Some(phone)) => self.phone_record(&phone, input.phone_code, name).await?,
            (None, None) => return Err(AuthError::MissingCredentials("email")),
        };

        self.identity_repo.create(&record).await?;

        tracing::info!(
            user_id = %record.user_id,
            origin = record.registration_origin.code(),
            "Identity registered"
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

        let candidates = self
            .finder
            .execute(CandidateSearch::for_record(&record), &record.user_id)
            .await?;

        Ok(RegisterOutput {
            principal: Principal::aggregate(&record, &[]),
            candidates,
        })
    }

    async fn password_record(
        &self,
        email: &str,
        password: Option<String>,
        name: Option<DisplayName>,
    ) -> AuthResult<IdentityRecord> {
        let email = Email::new(email)?;
        let password = non_blank(password).ok_or(AuthError::MissingCredentials("password"))?;
        let password = ClearTextPassword::new(password)?;

        if self
            .identity_repo
            .find_active_by_email(&email)
            .await?
            .is_some()
        {
            return Err(AuthError::EmailTaken);
        }

        let hash = password.hash(self.config.pepper())?;
        Ok(IdentityRecord::new_password(email, hash, name))
    }

    async fn phone_record(
        &self,
        phone: &str,
        code: Option<String>,
        name: Option<DisplayName>,
    ) -> AuthResult<IdentityRecord> {
        let phone = PhoneNumber::parse(phone)?;
        let code = non_blank(code).ok_or(AuthError::MissingCredentials("phoneCode"))?;

        if self
            .identity_repo
            .find_active_by_phone(&phone)
            .await?
            .is_some()
        {
            return Err(AuthError::PhoneTaken);
        }

        let destination = Destination::Phone(phone.clone());
        let valid = within(
            self.config.gateway_timeout,
            "check_code",
            self.verification.check_code(&destination, code.trim()),
        )
        .await?
        .unwrap_or(false);
        if !valid {
            return Err(AuthError::InvalidOrExpiredCode);
        }

        Ok(IdentityRecord::new_phone(phone, name))
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
