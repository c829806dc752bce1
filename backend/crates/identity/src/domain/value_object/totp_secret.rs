//! TOTP Secret Value Object
//!
//! Google Authenticator compatible: SHA1, 6 digits, 30 s step, one step of skew.

use serde::{Deserialize, Serialize};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::error::{AuthError, AuthResult};

const TOTP_DIGITS: usize = 6;
const TOTP_STEP: u64 = 30;
const TOTP_SKEW: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpSecret {
    secret_base32: String,
}

impl TotpSecret {
    /// New random 160-bit secret
    pub fn generate() -> Self {
        Self {
            secret_base32: Secret::generate_secret().to_encoded().to_string(),
        }
    }

    /// From stored base32
    pub fn from_base32(secret: impl Into<String>) -> AuthResult<Self> {
        let secret_base32 = secret.into();
        Secret::Encoded(secret_base32.clone())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("Invalid TOTP secret: {e}")))?;
        Ok(Self { secret_base32 })
    }

    pub fn as_base32(&self) -> &str {
        &self.secret_base32
    }

    fn to_totp(&self, issuer: &str, account_name: &str) -> AuthResult<TOTP> {
        let bytes = Secret::Encoded(self.secret_base32.clone())
            .to_bytes()
            .map_err(|e| AuthError::Internal(format!("Invalid TOTP secret: {e}")))?;

        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            bytes,
            Some(issuer.to_string()),
            account_name.to_string(),
        )
        .map_err(|e| AuthError::Internal(format!("Failed to create TOTP: {e}")))
    }

    /// Check a code against the current window (± skew)
    pub fn verify(&self, code: &str, issuer: &str, account_name: &str) -> AuthResult<bool> {
        let code = code.trim();
        if code.len() != TOTP_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Ok(false);
        }
        let totp = self.to_totp(issuer, account_name)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    #[cfg(test)]
    pub fn generate_current(&self, issuer: &str, account_name: &str) -> AuthResult<String> {
        self.to_totp(issuer, account_name)?
            .generate_current()
            .map_err(|e| AuthError::Internal(format!("Failed to generate TOTP: {e}")))
    }

    /// QR code (PNG, base64) for authenticator enrollment
    pub fn qr_code_base64(&self, issuer: &str, account_name: &str) -> AuthResult<String> {
        self.to_totp(issuer, account_name)?
            .get_qr_base64()
            .map_err(|e| AuthError::Internal(format!("Failed to generate QR code: {e}")))
    }

    /// `otpauth://` URL for manual entry
    pub fn otpauth_url(&self, issuer: &str, account_name: &str) -> AuthResult<String> {
        Ok(self.to_totp(issuer, account_name)?.get_url())
    }
}
