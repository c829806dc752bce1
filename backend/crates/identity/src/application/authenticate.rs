//! Authenticate Use Case
//!
//! One sign-in attempt:
//! `CredentialCheck -> [second factor] -> AutoLinkEvaluate -> GroupResolve -> SessionIssue`
//!
//! Auto-link evaluation only runs for OAuth sign-ins of ungrouped records.
//!
//! Every authentication failure is audited as `signin_failed` before it is
//! returned; infrastructure failures propagate untouched.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{GroupId, UserId};
use platform::client::ClientContext;
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::find_candidates::CandidateSearch;
use crate::application::link_accounts::{LinkAccountsUseCase, LinkOutcome};
use crate::application::session::{SessionClaims, SessionProjector};
use crate::application::support::{load_active, record_activity, resolve_principal, within};
use crate::application::verify_credential::{VerifiedCredential, VerifyCredentialUseCase};
use crate::domain::entity::{ActivityEvent, ActivityKind, Principal};
use crate::domain::gateway::{OAuthGateway, VerificationGateway};
use crate::domain::repository::{ActivityRepository, IdentityRepository};
use crate::domain::value_object::{
    AuthMethod, Credential, Email, OAuthCredential, OAuthProvider,
};
use crate::error::{AuthError, AuthResult};

/// Successful sign-in
#[derive(Debug, Clone)]
pub struct SignInOutput {
    pub principal: Principal,
    pub claims: SessionClaims,
    pub session_token: String,
    /// Group joined by auto-linking during this sign-in
    pub auto_linked_group: Option<GroupId>,
    /// The record was created by this sign-in
    pub created: bool,
}

/// Authenticate use case
pub struct AuthenticateUseCase<R, A, V, O>
where
    R: IdentityRepository,
    A: ActivityRepository,
    V: VerificationGateway,
    O: OAuthGateway,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    oauth: Arc<O>,
    verifier: VerifyCredentialUseCase<R, A, V>,
    linker: LinkAccountsUseCase<R, A>,
    projector: SessionProjector<R>,
    config: Arc<IdentityConfig>,
}

impl<R, A, V, O> AuthenticateUseCase<R, A, V, O>
where
    R: IdentityRepository,
    A: ActivityRepository,
    V: VerificationGateway,
    O: OAuthGateway,
{
    pub fn new(
        identity_repo: Arc<R>,
        activity_repo: Arc<A>,
        verification: Arc<V>,
        oauth: Arc<O>,
        config: Arc<IdentityConfig>,
    ) -> Self {
        Self {
            verifier: VerifyCredentialUseCase::new(
                identity_repo.clone(),
                activity_repo.clone(),
                verification,
                config.clone(),
            ),
            linker: LinkAccountsUseCase::new(
                identity_repo.clone(),
                activity_repo.clone(),
                config.clone(),
            ),
            projector: SessionProjector::new(identity_repo.clone(), config.clone()),
            identity_repo,
            activity_repo,
            oauth,
            config,
        }
    }

    pub async fn execute(
        &self,
        credential: Credential,
        client: ClientContext,
    ) -> AuthResult<SignInOutput> {
        let method = credential.method();
        let identifier = credential.audit_identifier();

        let oauth_email = match &credential {
            Credential::OAuth(c) => {
                if !self.config.is_provider_enabled(c.provider) {
                    return Err(AuthError::UnsupportedProvider(c.provider.to_string()));
                }
                Some(c.email.clone())
            }
            _ => None,
        };

        let verified = match self.verifier.execute(credential).await {
            Ok(verified) => verified,
            Err(e) => {
                self.audit_failure(method, &identifier, &e, &client).await;
                return Err(e);
            }
        };

        self.complete(method, verified, oauth_email.flatten(), client)
            .await
    }

    /// Exchange an authorization code, then sign in with the returned profile
    pub async fn authenticate_oauth_code(
        &self,
        provider: OAuthProvider,
        code: &str,
        client: ClientContext,
    ) -> AuthResult<SignInOutput> {
        if !self.config.is_provider_enabled(provider) {
            return Err(AuthError::UnsupportedProvider(provider.to_string()));
        }
        if code.trim().is_empty() {
            return Err(AuthError::MissingCredentials("code"));
        }

        let profile = within(
            self.config.gateway_timeout,
            "exchange_token",
            self.oauth.exchange_token(provider, code.trim()),
        )
        .await?
        .flatten();

        let Some(profile) = profile else {
            let e = AuthError::InvalidOrExpiredCode;
            self.audit_failure(AuthMethod::OAuth, provider.as_str(), &e, &client)
                .await;
            return Err(e);
        };

        // A malformed provider email is dropped, not rejected
        let credential = OAuthCredential {
            provider,
            provider_account_id: profile.provider_account_id,
            email: profile.email.as_deref().and_then(|e| Email::new(e).ok()),
            name: profile.name,
            image: profile.image,
        };
        self.execute(Credential::OAuth(credential), client).await
    }

    async fn complete(
        &self,
        method: AuthMethod,
        verified: VerifiedCredential,
        oauth_email: Option<Email>,
        client: ClientContext,
    ) -> AuthResult<SignInOutput> {
        let user_id = verified.record.user_id;

        let mut auto_linked_group = None;
        if let Some(email) = oauth_email {
            if verified.record.group.is_none() {
                let search = CandidateSearch {
                    email: Some(email),
                    name: verified.record.display_name.clone(),
                    email_vouched: true,
                    ..Default::default()
                };
                auto_linked_group = self.auto_link(&user_id, search).await?;
            }
        }

        self.identity_repo
            .record_sign_in(&user_id, Utc::now())
            .await?;

        let subject = load_active(self.identity_repo.as_ref(), &user_id).await?;
        let principal = resolve_principal(self.identity_repo.as_ref(), &subject).await?;
        let (claims, session_token) = self.projector.issue(principal.clone())?;

        tracing::info!(
            user_id = %user_id,
            method = %method,
            group_id = ?principal.group_id,
            second_factor = ?verified.second_factor.map(|f| f.to_string()),
            "User signed in"
        );
        record_activity(
            self.activity_repo.as_ref(),
            ActivityEvent::new(
                ActivityKind::SigninSuccess,
                Some(user_id),
                json!({
                    "method": method,
                    "secondFactor": verified.second_factor.map(|f| f.to_string()),
                    "created": verified.created,
                    "ip": client.ip_string(),
                    "userAgent": client.user_agent,
                }),
            ),
        )
        .await;

        Ok(SignInOutput {
            principal,
            claims,
            session_token,
            auto_linked_group,
            created: verified.created,
        })
    }

    /// A failed or contended auto-link never blocks the sign-in; store
    /// outages still propagate
    async fn auto_link(
        &self,
        user_id: &UserId,
        search: CandidateSearch,
    ) -> AuthResult<Option<GroupId>> {
        let outcome = self
            .linker
            .auto_link_if_confident(user_id, search, self.config.oauth_auto_link_min_confidence)
            .await;

        match outcome {
            Ok(Some(LinkOutcome::Linked { group_id, .. })) => Ok(Some(group_id)),
            Ok(Some(LinkOutcome::AlreadyLinked { .. })) | Ok(None) => Ok(None),
            Err(e) if e.is_infrastructure() => Err(e),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Auto-link skipped");
                Ok(None)
            }
        }
    }

    async fn audit_failure(
        &self,
        method: AuthMethod,
        identifier: &str,
        error: &AuthError,
        client: &ClientContext,
    ) {
        if !error.is_auth_failure() {
            return;
        }
        tracing::warn!(method = %method, reason = error.code(), "Sign-in failed");
        record_activity(
            self.activity_repo.as_ref(),
            ActivityEvent::new(
                ActivityKind::SigninFailed,
                None,
                json!({
                    "method": method,
                    "identifier": identifier,
                    "reason": error.code(),
                    "ip": client.ip_string(),
                    "userAgent": client.user_agent,
                }),
            ),
        )
        .await;
    }
}
