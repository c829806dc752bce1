//! Session Projector
//!
//! Projects a principal into signed, self-contained session claims.
//!
//! Token format: `base64url(json(claims)) "." base64url(HMAC-SHA256(secret, payload))`.
//! Timestamps are Unix milliseconds.

use std::sync::Arc;

use chrono::Utc;
use kernel::id::{GroupId, UserId};
use platform::crypto::{from_base64url, hmac_sha256, to_base64url, verify_hmac_sha256};
use serde::{Deserialize, Serialize};

use crate::application::config::IdentityConfig;
use crate::application::support::resolve_principal;
use crate::domain::entity::Principal;
use crate::domain::repository::IdentityRepository;
use crate::error::{AuthError, AuthResult};

/// Claims carried by a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub sub: UserId,
    pub primary_account_id: UserId,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
    pub group_id: Option<GroupId>,
    pub linked_emails: Vec<String>,
    pub linked_phones: Vec<String>,
    pub linked_providers: Vec<String>,
    pub has_linked_accounts: bool,
    pub two_factor_enabled: bool,
    pub iat: i64,
    pub exp: i64,
}

impl SessionClaims {
    pub fn from_principal(principal: Principal, iat: i64, exp: i64) -> Self {
        Self {
            sub: principal.id,
            primary_account_id: principal.primary_account_id,
            email: principal.email,
            phone_number: principal.phone_number,
            name: principal.name,
            image: principal.image,
            group_id: principal.group_id,
            linked_emails: principal.linked_emails,
            linked_phones: principal.linked_phones,
            linked_providers: principal.linked_providers,
            has_linked_accounts: principal.has_linked_accounts,
            two_factor_enabled: principal.two_factor_enabled,
            iat,
            exp,
        }
    }

    pub fn to_principal(&self) -> Principal {
        Principal {
            id: self.sub,
            primary_account_id: self.primary_account_id,
            email: self.email.clone(),
            phone_number: self.phone_number.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            group_id: self.group_id,
            linked_emails: self.linked_emails.clone(),
            linked_phones: self.linked_phones.clone(),
            linked_providers: self.linked_providers.clone(),
            has_linked_accounts: self.has_linked_accounts,
            two_factor_enabled: self.two_factor_enabled,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.exp
    }
}

/// Session projector
pub struct SessionProjector<R>
where
    R: IdentityRepository,
{
    identity_repo: Arc<R>,
    config: Arc<IdentityConfig>,
}

impl<R> SessionProjector<R>
where
    R: IdentityRepository,
{
    pub fn new(identity_repo: Arc<R>, config: Arc<IdentityConfig>) -> Self {
        Self {
            identity_repo,
            config,
        }
    }

    /// Sign a fresh token for `principal`
    pub fn issue(&self, principal: Principal) -> AuthResult<(SessionClaims, String)> {
        let now = Utc::now().timestamp_millis();
        let claims =
            SessionClaims::from_principal(principal, now, now + self.config.session.ttl_ms());
        let token = self.encode(&claims)?;
        Ok((claims, token))
    }

    /// Verify signature and expiry
    pub fn decode(&self, token: &str) -> AuthResult<SessionClaims> {
        let (payload, signature) = token.split_once('.').ok_or(AuthError::SessionInvalid)?;
        let signature = from_base64url(signature).map_err(|_| AuthError::SessionInvalid)?;

        if !verify_hmac_sha256(&self.config.session.secret, payload.as_bytes(), &signature) {
            return Err(AuthError::SessionInvalid);
        }

        let json = from_base64url(payload).map_err(|_| AuthError::SessionInvalid)?;
        let claims: SessionClaims =
            serde_json::from_slice(&json).map_err(|_| AuthError::SessionInvalid)?;

        if claims.is_expired(Utc::now().timestamp_millis()) {
            return Err(AuthError::SessionInvalid);
        }
        Ok(claims)
    }

    /// Re-resolve the subject's group and re-sign, keeping `iat` / `exp`
    pub async fn refresh(&self, token: &str) -> AuthResult<(SessionClaims, String)> {
        let claims = self.decode(token)?;

        let subject = self
            .identity_repo
            .find_by_id(&claims.sub)
            .await?
            .filter(|r| r.is_active())
            .ok_or(AuthError::SessionInvalid)?;

        let principal = resolve_principal(self.identity_repo.as_ref(), &subject).await?;
        let refreshed = SessionClaims::from_principal(principal, claims.iat, claims.exp);
        let token = self.encode(&refreshed)?;
        Ok((refreshed, token))
    }

    fn encode(&self, claims: &SessionClaims) -> AuthResult<String> {
        let json = serde_json::to_vec(claims)
            .map_err(|e| AuthError::Internal(format!("Failed to encode session: {e}")))?;
        let payload = to_base64url(&json);
        let mac = hmac_sha256(&self.config.session.secret, payload.as_bytes())
            .map_err(|e| AuthError::Internal(format!("Failed to sign session: {e}")))?;
        Ok(format!("{payload}.{}", to_base64url(&mac)))
    }
}
