//! Phone Number Value Object
//!
//! E.164 form: `+`, then 8 to 15 digits, the first non-zero.
//! Common separators (spaces, dashes, dots, parentheses) are stripped and
//! an international `00` prefix is rewritten to `+`.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AuthError, AuthResult};

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize to E.164
    pub fn parse(raw: impl AsRef<str>) -> AuthResult<Self> {
        let compact: String = raw
            .as_ref()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')' | '\u{a0}'))
            .collect();

        if compact.is_empty() {
            return Err(AuthError::MissingCredentials("phoneNumber"));
        }

        let digits = if let Some(rest) = compact.strip_prefix('+') {
            rest
        } else if let Some(rest) = compact.strip_prefix("00") {
            rest
        } else {
            return Err(AuthError::InvalidPhoneFormat);
        };

        let valid = (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len())
            && digits.chars().all(|c| c.is_ascii_digit())
            && !digits.starts_with('0');
        if !valid {
            return Err(AuthError::InvalidPhoneFormat);
        }

        Ok(Self(format!("+{digits}")))
    }

    pub fn from_db(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last four digits, for logs
    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("***{tail}")
    }
}

impl FromStr for PhoneNumber {
    type Err = AuthError;

    fn from_str(s: &str) -> AuthResult<Self> {
        PhoneNumber::parse(s)
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = AuthError;

    fn try_from(value: String) -> AuthResult<Self> {
        PhoneNumber::parse(value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
