//! API DTOs (Data Transfer Objects)

use kernel::id::{GroupId, UserId};
use serde::{Deserialize, Serialize};

use crate::application::{LinkOutcome, SessionClaims, SignInOutput, TotpSetupOutput};
use crate::domain::entity::{LinkCandidate, Principal};
use crate::domain::value_object::BackupCode;

// ============================================================================
// Sign In
// ============================================================================

/// Email + password sign in request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSignInRequest {
    pub email: String,
    pub password: String,
    /// TOTP or backup code if 2FA is enabled
    pub two_factor_code: Option<String>,
}

/// Phone + one-time code sign in request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneSignInRequest {
    pub phone_number: String,
    pub code: String,
}

/// Request a sign in code for a phone
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneCodeRequest {
    pub phone_number: String,
}

/// OAuth authorization code sign in request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSignInRequest {
    pub provider: String,
    pub code: String,
}

/// Sign in response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInResponse {
    pub principal: Principal,
    pub expires_at_ms: i64,
    /// Set when this sign in linked the account into a group
    pub auto_linked_group_id: Option<GroupId>,
    pub created: bool,
}

impl From<&SignInOutput> for SignInResponse {
    fn from(output: &SignInOutput) -> Self {
        Self {
            principal: output.principal.clone(),
            expires_at_ms: output.claims.exp,
            auto_linked_group_id: output.auto_linked_group,
            created: output.created,
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registration request; email registration wins when both are given
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub phone_number: Option<String>,
    pub phone_code: Option<String>,
    pub name: Option<String>,
}

/// Registration response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub principal: Principal,
    pub candidates: Vec<LinkCandidate>,
}

// ============================================================================
// Session
// ============================================================================

/// Session status response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub authenticated: bool,
    pub session: Option<SessionClaims>,
}

// ============================================================================
// Linking
// ============================================================================

/// Candidate list response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatesResponse {
    pub candidates: Vec<LinkCandidate>,
}

/// Confirmed link request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub secondary_account_ids: Vec<UserId>,
}

/// Link response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkResponse {
    pub group_id: GroupId,
    pub already_linked: bool,
    pub master_id: Option<UserId>,
    pub member_ids: Vec<UserId>,
}

impl From<LinkOutcome> for LinkResponse {
    fn from(outcome: LinkOutcome) -> Self {
        match outcome {
            LinkOutcome::Linked {
                group_id,
                master_id,
                member_ids,
            } => Self {
                group_id,
                already_linked: false,
                master_id: Some(master_id),
                member_ids,
            },
            LinkOutcome::AlreadyLinked { group_id } => Self {
                group_id,
                already_linked: true,
                master_id: None,
                member_ids: Vec::new(),
            },
        }
    }
}

// ============================================================================
// Deactivation
// ============================================================================

/// Deactivation request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateRequest {
    #[serde(default)]
    pub transfer_ownership: bool,
    pub transfer_to: Option<UserId>,
}

/// Deactivation response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeactivateResponse {
    pub user_id: UserId,
    pub new_master_id: Option<UserId>,
}

// ============================================================================
// Contact Verification
// ============================================================================

/// Exactly one of `email` / `phoneNumber`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactCodeRequest {
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// Contact confirmation request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactConfirmRequest {
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub code: String,
}

// ============================================================================
// Two-Factor
// ============================================================================

/// TOTP setup response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TotpSetupResponse {
    /// QR code as base64-encoded PNG
    pub qr_code: String,
    /// Secret for manual entry
    pub secret: String,
    /// otpauth:// URL
    pub otpauth_url: String,
}

impl From<TotpSetupOutput> for TotpSetupResponse {
    fn from(output: TotpSetupOutput) -> Self {
        Self {
            qr_code: output.qr_code_base64,
            secret: output.secret,
            otpauth_url: output.otpauth_url,
        }
    }
}

/// Any two-factor management call carrying a code
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TwoFactorCodeRequest {
    pub code: String,
}

/// Freshly issued backup codes (shown once)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCodesResponse {
    pub backup_codes: Vec<String>,
}

impl From<Vec<BackupCode>> for BackupCodesResponse {
    fn from(codes: Vec<BackupCode>) -> Self {
        Self {
            backup_codes: codes.iter().map(|c| c.as_str().to_string()).collect(),
        }
    }
}
