//! Two-Factor Management Use Case
//!
//! Set up, enable, disable TOTP and rotate backup codes.

use std::sync::Arc;

use kernel::id::UserId;
use serde_json::json;

use crate::application::config::IdentityConfig;
use crate::application::second_factor::{check_totp, verify_second_factor};
use crate::application::support::{load_active, record_activity, update_with_retry};
use crate::domain::entity::{ActivityEvent, ActivityKind, TwoFactor};
use crate::domain::repository::{ActivityRepository, IdentityRepository};
use crate::domain::value_object::{BackupCode, TotpSecret};
use crate::error::{AuthError, AuthResult};

/// TOTP setup output
#[derive(Debug, Clone)]
pub struct TotpSetupOutput {
    /// QR code as base64-encoded PNG
    pub qr_code_base64: String,
    /// Secret for manual entry
    pub secret: String,
    /// otpauth:// URL
    pub otpauth_url: String,
}

/// Two-factor use case
pub struct TwoFactorUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    identity_repo: Arc<R>,
    activity_repo: Arc<A>,
    config: Arc<IdentityConfig>,
}

impl<R, A> TwoFactorUseCase<R, A>
where
    R: IdentityRepository,
    A: ActivityRepository,
{
    pub fn new(identity_repo: Arc<R>, activity_repo: Arc<A>, config: Arc<IdentityConfig>) -> Self {
        Self {
            identity_repo,
            activity_repo,
            config,
        }
    }

    /// Store a new pending secret (not enabled until confirmed)
    pub async fn setup(&self, user_id: &UserId) -> AuthResult<TotpSetupOutput> {
        let secret = TotpSecret::generate();

        let record = update_with_retry(
            self.identity_repo.as_ref(),
            user_id,
            self.config.merge_max_attempts,
            |record| {
                if record.two_factor.enabled {
                    return Err(AuthError::TwoFactorAlreadyEnabled);
                }
                record.two_factor.secret = Some(secret.clone());
                Ok(())
            },
        )
        .await?;

        let account_name = record.account_label();
        let issuer = &self.config.totp_issuer;
        let output = TotpSetupOutput {
            qr_code_base64: secret.qr_code_base64(issuer, &account_name)?,
            secret: secret.as_base32().to_string(),
            otpauth_url: secret.otpauth_url(issuer, &account_name)?,
        };

        tracing::info!(user_id = %user_id, "TOTP setup started");
        Ok(output)
    }

    /// Confirm the pending secret with a current code; returns the backup
    /// codes, shown to the user exactly once
    pub async fn enable(&self, user_id: &UserId, code: &str) -> AuthResult<Vec<BackupCode>> {
        let record = load_active(self.identity_repo.as_ref(), user_id).await?;
        if record.two_factor.enabled {
            return Err(AuthError::TwoFactorAlreadyEnabled);
        }
        let pending = record
            .two_factor
            .secret
            .clone()
            .ok_or(AuthError::TwoFactorNotSetup)?;
        if !check_totp(&self.config, &record, code)? {
            return Err(AuthError::InvalidTwoFactorCode);
        }

        let codes = BackupCode::generate_set(self.config.backup_code_count);
        update_with_retry(
            self.identity_repo.as_ref(),
            user_id,
            self.config.merge_max_attempts,
            |record| {
                if record.two_factor.secret.as_ref() != Some(&pending) {
                    return Err(AuthError::TwoFactorNotSetup);
                }
                record.two_factor.enabled = true;
                record.two_factor.backup_codes = codes.clone();
                Ok(())
            },
        )
        .await?;

        tracing::info!(user_id = %user_id, "TOTP enabled");
        self.audit(
            user_id,
            ActivityKind::TwoFactorEnabled,
            json!({ "backupCodes": codes.len() }),
        )
        .await;
        Ok(codes)
    }

    /// Requires a TOTP or backup code; clears secret and codes
    pub async fn disable(&self, user_id: &UserId, code: &str) -> AuthResult<()> {
        let record = load_active(self.identity_repo.as_ref(), user_id).await?;
        if !record.two_factor.enabled {
            return Err(AuthError::TwoFactorNotSetup);
        }
        let factor = verify_second_factor(
            self.identity_repo.as_ref(),
            &self.config,
            &record,
            Some(code),
            true,
        )
        .await
        .map_err(invalid_when_missing)?;

        update_with_retry(
            self.identity_repo.as_ref(),
            user_id,
            self.config.merge_max_attempts,
            |record| {
                record.two_factor = TwoFactor::default();
                Ok(())
            },
        )
        .await?;

        tracing::info!(user_id = %user_id, factor = %factor, "TOTP disabled");
        self.audit(
            user_id,
            ActivityKind::TwoFactorDisabled,
            json!({ "factor": factor.to_string() }),
        )
        .await;
        Ok(())
    }

    /// Requires a TOTP code; replaces every backup code
    pub async fn regenerate_backup_codes(
        &self,
        user_id: &UserId,
        code: &str,
    ) -> AuthResult<Vec<BackupCode>> {
        let record = load_active(self.identity_repo.as_ref(), user_id).await?;
        if !record.two_factor.enabled {
            return Err(AuthError::TwoFactorNotSetup);
        }
        verify_second_factor(
            self.identity_repo.as_ref(),
            &self.config,
            &record,
            Some(code),
            false,
        )
        .await
        .map_err(invalid_when_missing)?;

        let codes = BackupCode::generate_set(self.config.backup_code_count);
        update_with_retry(
            self.identity_repo.as_ref(),
            user_id,
            self.config.merge_max_attempts,
            |record| {
                if !record.two_factor.enabled {
                    return Err(AuthError::TwoFactorNotSetup);
                }
                record.two_factor.backup_codes = codes.clone();
                Ok(())
            },
        )
        .await?;

        tracing::info!(user_id = %user_id, count = codes.len(), "Backup codes regenerated");
        self.audit(
            user_id,
            ActivityKind::BackupCodesRegenerated,
            json!({ "backupCodes": codes.len() }),
        )
        .await;
        Ok(codes)
    }

    async fn audit(&self, user_id: &UserId, kind: ActivityKind, metadata: serde_json::Value) {
        record_activity(
            self.activity_repo.as_ref(),
            ActivityEvent::new(kind, Some(*user_id), metadata),
        )
        .await;
    }
}

/// Management calls always carry a code; a blank one is simply wrong
fn invalid_when_missing(e: AuthError) -> AuthError {
    match e {
        AuthError::TwoFactorRequired => AuthError::InvalidTwoFactorCode,
        other => other,
    }
}
