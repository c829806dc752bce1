//! Identity Error Types
//!
//! Identity-specific error variants that integrate with the unified
//! `kernel::error::AppError` system.
//!
//! Rendering rules:
//! - authentication failures get generic, non-enumerating messages, except
//!   `WrongProvider`, which names the provider so the client can redirect
//! - store and gateway error text is logged, never rendered

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use kernel::id::UserId;
use thiserror::Error;

use crate::domain::value_object::provider::OAuthProvider;

/// Identity-specific result type alias
pub type AuthResult<T> = Result<T, AuthError>;

const GENERIC_CREDENTIAL_FAILURE: &str = "Invalid credentials or verification code";

#[derive(Debug, Error)]
pub enum AuthError {
    // ------------------------------------------------------------------
    // Client errors
    // ------------------------------------------------------------------
    #[error("Missing required credential field: {0}")]
    MissingCredentials(&'static str),

    #[error("Phone number must be in international format")]
    InvalidPhoneFormat,

    #[error("Invalid email format")]
    InvalidEmailFormat,

    #[error("Password policy violation: {0}")]
    PasswordPolicy(String),

    #[error("Unsupported sign-in provider: {0}")]
    UnsupportedProvider(String),

    #[error("Invalid link request: {0}")]
    InvalidLinkRequest(&'static str),

    // ------------------------------------------------------------------
    // Authentication failures
    // ------------------------------------------------------------------
    #[error("No active identity matches the credential")]
    NotFound,

    #[error("Account was registered with {0}")]
    WrongProvider(OAuthProvider),

    #[error("Credential did not match")]
    InvalidCredential,

    #[error("Phone number has not been verified")]
    PhoneUnverified,

    #[error("Verification code invalid or expired")]
    InvalidOrExpiredCode,

    #[error("Two-factor authentication required")]
    TwoFactorRequired,

    #[error("Invalid two-factor authentication code")]
    InvalidTwoFactorCode,

    #[error("Two-factor authentication not set up")]
    TwoFactorNotSetup,

    #[error("Two-factor authentication already enabled")]
    TwoFactorAlreadyEnabled,

    #[error("Session not found or expired")]
    SessionInvalid,

    // ------------------------------------------------------------------
    // Registration conflicts
    // ------------------------------------------------------------------
    #[error("Email already registered")]
    EmailTaken,

    #[error("Phone number already registered")]
    PhoneTaken,

    // ------------------------------------------------------------------
    // Linking / deactivation
    // ------------------------------------------------------------------
    #[error("Link candidate no longer exists or is inactive")]
    CandidateNotFound,

    #[error("Concurrent modification; retries exhausted")]
    StoreConflict,

    #[error("Master account has {} other active members; ownership transfer required", .active_members.len())]
    RequiresTransfer { active_members: Vec<UserId> },

    #[error("Transfer target is not an active member of the group")]
    InvalidTransferTarget,

    // ------------------------------------------------------------------
    // Structural / fatal
    // ------------------------------------------------------------------
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.kind().status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::MissingCredentials(_)
            | AuthError::InvalidPhoneFormat
            | AuthError::InvalidEmailFormat
            | AuthError::PasswordPolicy(_)
            | AuthError::UnsupportedProvider(_)
            | AuthError::InvalidLinkRequest(_)
            | AuthError::InvalidTransferTarget => ErrorKind::BadRequest,

            AuthError::NotFound
            | AuthError::WrongProvider(_)
            | AuthError::InvalidCredential
            | AuthError::PhoneUnverified
            | AuthError::InvalidOrExpiredCode
            | AuthError::InvalidTwoFactorCode
            | AuthError::SessionInvalid => ErrorKind::Unauthorized,

            AuthError::TwoFactorRequired => ErrorKind::PreconditionRequired,
            AuthError::TwoFactorNotSetup => ErrorKind::UnprocessableEntity,

            AuthError::CandidateNotFound => ErrorKind::NotFound,

            AuthError::TwoFactorAlreadyEnabled
            | AuthError::EmailTaken
            | AuthError::PhoneTaken
            | AuthError::StoreConflict
            | AuthError::RequiresTransfer { .. } => ErrorKind::Conflict,

            AuthError::Database(_) | AuthError::Gateway(_) => ErrorKind::ServiceUnavailable,
            AuthError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Credential did not prove identity; these are always audited
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            AuthError::NotFound
                | AuthError::WrongProvider(_)
                | AuthError::InvalidCredential
                | AuthError::PhoneUnverified
                | AuthError::InvalidOrExpiredCode
                | AuthError::TwoFactorRequired
                | AuthError::InvalidTwoFactorCode
        )
    }

    /// Store or gateway could not be reached
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AuthError::Database(_) | AuthError::Gateway(_) | AuthError::Internal(_)
        )
    }

    /// Stable snake_case code used in audit metadata
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials(_) => "missing_credentials",
            AuthError::InvalidPhoneFormat => "invalid_phone_format",
            AuthError::InvalidEmailFormat => "invalid_email_format",
            AuthError::PasswordPolicy(_) => "password_policy",
            AuthError::UnsupportedProvider(_) => "unsupported_provider",
            AuthError::InvalidLinkRequest(_) => "invalid_link_request",
            AuthError::NotFound => "not_found",
            AuthError::WrongProvider(_) => "wrong_provider",
            AuthError::InvalidCredential => "invalid_credential",
            AuthError::PhoneUnverified => "phone_unverified",
            AuthError::InvalidOrExpiredCode => "invalid_or_expired_code",
            AuthError::TwoFactorRequired => "two_factor_required",
            AuthError::InvalidTwoFactorCode => "invalid_two_factor_code",
            AuthError::TwoFactorNotSetup => "two_factor_not_setup",
            AuthError::TwoFactorAlreadyEnabled => "two_factor_already_enabled",
            AuthError::SessionInvalid => "session_invalid",
            AuthError::EmailTaken => "email_taken",
            AuthError::PhoneTaken => "phone_taken",
            AuthError::CandidateNotFound => "candidate_not_found",
            AuthError::StoreConflict => "store_conflict",
            AuthError::RequiresTransfer { .. } => "requires_transfer",
            AuthError::InvalidTransferTarget => "invalid_transfer_target",
            AuthError::Database(_) => "database",
            AuthError::Gateway(_) => "gateway",
            AuthError::Internal(_) => "internal",
        }
    }

    /// Message safe to show to the caller
    pub fn public_message(&self) -> String {
        match self {
            AuthError::NotFound
            | AuthError::InvalidCredential
            | AuthError::PhoneUnverified
            | AuthError::InvalidOrExpiredCode => GENERIC_CREDENTIAL_FAILURE.to_string(),
            AuthError::WrongProvider(provider) => {
                format!("This account signs in with {}", provider.label())
            }
            AuthError::Database(_) | AuthError::Gateway(_) => {
                "Service temporarily unavailable".to_string()
            }
            AuthError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }

    /// User-facing hint, when one exists
    fn action(&self) -> Option<String> {
        match self {
            AuthError::WrongProvider(provider) => {
                Some(format!("Continue with {}", provider.label()))
            }
            AuthError::TwoFactorRequired => {
                Some("Submit the code from your authenticator app or a backup code".to_string())
            }
            AuthError::RequiresTransfer { active_members } => Some(format!(
                "Transfer ownership to one of: {}",
                active_members
                    .iter()
                    .map(|id| id.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            AuthError::StoreConflict | AuthError::Database(_) | AuthError::Gateway(_) => {
                Some("Retry the request".to_string())
            }
            _ => None,
        }
    }

    /// Convert to AppError
    pub fn to_app_error(&self) -> AppError {
        let err = AppError::new(self.kind(), self.public_message());
        match self.action() {
            Some(action) => err.with_action(action),
            None => err,
        }
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            AuthError::Database(e) => {
                tracing::error!(error = %e, "Identity store error");
            }
            AuthError::Gateway(msg) => {
                tracing::error!(message = %msg, "Identity gateway error");
            }
            AuthError::Internal(msg) => {
                tracing::error!(message = %msg, "Identity internal error");
            }
            AuthError::StoreConflict => {
                tracing::warn!("Identity write conflict after retries");
            }
            err if err.is_auth_failure() => {
                tracing::warn!(reason = err.code(), "Authentication rejected");
            }
            _ => {
                tracing::debug!(error = %self, "Identity request rejected");
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        self.to_app_error().into_response()
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<platform::password::PasswordPolicyError> for AuthError {
    fn from(err: platform::password::PasswordPolicyError) -> Self {
        AuthError::PasswordPolicy(err.to_string())
    }
}

impl From<platform::password::PasswordHashError> for AuthError {
    fn from(err: platform::password::PasswordHashError) -> Self {
        AuthError::Internal(err.to_string())
    }
}
