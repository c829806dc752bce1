//! OAuth Provider Value Objects
//!
//! - [`OAuthProvider`]: closed set of supported providers
//! - [`ProviderAccount`]: one account at one provider, stored as `provider:account_id`

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::AuthError;

/// Supported OAuth providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    #[display("google")]
    Google,
    #[display("github")]
    Github,
}

impl OAuthProvider {
    pub const ALL: [OAuthProvider; 2] = [OAuthProvider::Google, OAuthProvider::Github];

    /// Lowercase code, as stored in `linked_providers`
    #[inline]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
        }
    }

    /// Human-readable name
    #[inline]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Github => "GitHub",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "google" => Some(Self::Google),
            "github" => Some(Self::Github),
            _ => None,
        }
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_code(s).ok_or_else(|| AuthError::UnsupportedProvider(s.to_string()))
    }
}

/// An account at an OAuth provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderAccount {
    provider: OAuthProvider,
    account_id: String,
}

impl ProviderAccount {
    pub fn new(provider: OAuthProvider, account_id: impl Into<String>) -> Result<Self, AuthError> {
        let account_id = account_id.into().trim().to_string();
        if account_id.is_empty() {
            return Err(AuthError::MissingCredentials("providerAccountId"));
        }
        Ok(Self {
            provider,
            account_id,
        })
    }

    pub fn provider(&self) -> OAuthProvider {
        self.provider
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    /// `provider:account_id`
    pub fn to_storage(&self) -> String {
        format!("{}:{}", self.provider, self.account_id)
    }

    /// Parse the storage form; unknown providers are rejected
    pub fn from_storage(value: &str) -> Option<Self> {
        let (provider, account_id) = value.split_once(':')?;
        let provider = OAuthProvider::from_code(provider)?;
        if account_id.is_empty() {
            return None;
        }
        Some(Self {
            provider,
            account_id: account_id.to_string(),
        })
    }
}

impl std::fmt::Display for ProviderAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_storage())
    }
}
