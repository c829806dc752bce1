//! Credentials and Registration Origin
//!
//! [`Credential`] is a closed union: each sign-in method carries exactly the
//! fields it needs and nothing else.

use derive_more::Display;
use platform::password::ClearTextPassword;
use serde::{Deserialize, Serialize};

use crate::domain::value_object::{
    email::Email, phone_number::PhoneNumber, provider::OAuthProvider,
};

/// Sign-in method, for audit metadata and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[display("password")]
    Password,
    #[display("phone")]
    Phone,
    #[display("oauth")]
    OAuth,
}

/// How a record was first created
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOrigin {
    Password,
    Phone,
    OAuth(OAuthProvider),
}

impl RegistrationOrigin {
    /// Storage code: `password`, `phone`, or the provider code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Phone => "phone",
            Self::OAuth(provider) => provider.as_str(),
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "password" => Some(Self::Password),
            "phone" => Some(Self::Phone),
            other => OAuthProvider::from_code(other).map(Self::OAuth),
        }
    }

    pub fn oauth_provider(&self) -> Option<OAuthProvider> {
        match self {
            Self::OAuth(provider) => Some(*provider),
            _ => None,
        }
    }
}

/// Email + password, with an optional second factor
#[derive(Debug)]
pub struct EmailCredential {
    pub email: Email,
    pub password: ClearTextPassword,
    pub two_factor_code: Option<String>,
}

/// Normalized phone + one-time code
#[derive(Debug, Clone)]
pub struct PhoneCredential {
    pub phone_number: PhoneNumber,
    pub code: String,
}

/// Provider-vouched profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredential {
    pub provider: OAuthProvider,
    pub provider_account_id: String,
    pub email: Option<Email>,
    pub name: Option<String>,
    pub image: Option<String>,
}

#[derive(Debug)]
pub enum Credential {
    Email(EmailCredential),
    Phone(PhoneCredential),
    OAuth(OAuthCredential),
}

impl Credential {
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Email(_) => AuthMethod::Password,
            Credential::Phone(_) => AuthMethod::Phone,
            Credential::OAuth(_) => AuthMethod::OAuth,
        }
    }

    /// Identifier safe to put in audit metadata
    pub fn audit_identifier(&self) -> String {
        match self {
            Credential::Email(c) => c.email.to_string(),
            Credential::Phone(c) => c.phone_number.masked(),
            Credential::OAuth(c) => format!("{}:{}", c.provider, c.provider_account_id),
        }
    }
}
