//! Second Factor Check
//!
//! TOTP first, then a single-use backup code. Backup codes are removed with
//! one atomic store operation, so two concurrent requests presenting the
//! same code cannot both succeed.

use derive_more::Display;

use crate::application::config::IdentityConfig;
use crate::domain::entity::IdentityRecord;
use crate::domain::repository::IdentityRepository;
use crate::domain::value_object::BackupCode;
use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SecondFactor {
    #[display("totp")]
    Totp,
    #[display("backup_code")]
    BackupCode,
}

/// Check a submitted TOTP code against the record's secret
pub(crate) fn check_totp(
    config: &IdentityConfig,
    record: &IdentityRecord,
    code: &str,
) -> AuthResult<bool> {
    let secret = record
        .two_factor
        .secret
        .as_ref()
        .ok_or(AuthError::TwoFactorNotSetup)?;
    secret.verify(code, &config.totp_issuer, &record.account_label())
}

/// Accept a TOTP code or, when `allow_backup`, consume a backup code
///
/// A missing or blank code is `TwoFactorRequired`; a code that passes
/// neither check is `InvalidTwoFactorCode`.
pub(crate) async fn verify_second_factor<R>(
    repo: &R,
    config: &IdentityConfig,
    record: &IdentityRecord,
    code: Option<&str>,
    allow_backup: bool,
) -> AuthResult<SecondFactor>
where
    R: IdentityRepository,
{
    let code = code
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or(AuthError::TwoFactorRequired)?;

    if check_totp(config, record, code)? {
        return Ok(SecondFactor::Totp);
    }

    if allow_backup {
        if let Some(backup) = BackupCode::parse(code) {
            if repo.consume_backup_code(&record.user_id, &backup).await? {
                return Ok(SecondFactor::BackupCode);
            }
        }
    }

    Err(AuthError::InvalidTwoFactorCode)
}
