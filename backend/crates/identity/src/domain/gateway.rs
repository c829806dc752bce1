//! External Collaborators
//!
//! Code delivery and OAuth token exchange live outside this crate; these are
//! the contracts the core needs from them. Callers wrap every call in a
//! timeout and treat a timeout as a failed verification.

use serde::{Deserialize, Serialize};

use crate::domain::entity::Destination;
use crate::domain::value_object::OAuthProvider;
use crate::error::AuthResult;

/// One-time code delivery and checking (SMS, email)
#[trait_variant::make(VerificationGateway: Send)]
pub trait LocalVerificationGateway {
    /// Issue and deliver a fresh code to `destination`
    async fn send_code(&self, destination: &Destination) -> AuthResult<()>;

    /// True if `code` is the current, unexpired code for `destination`
    async fn check_code(&self, destination: &Destination, code: &str) -> AuthResult<bool>;
}

/// Profile returned by a provider after a successful code exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthProfile {
    pub provider_account_id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

/// Authorization-code exchange
#[trait_variant::make(OAuthGateway: Send)]
pub trait LocalOAuthGateway {
    /// `Ok(None)` when the provider rejects the code
    async fn exchange_token(
        &self,
        provider: OAuthProvider,
        code: &str,
    ) -> AuthResult<Option<OAuthProfile>>;
}
