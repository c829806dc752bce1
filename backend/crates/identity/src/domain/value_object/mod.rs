//! Value Objects

pub mod account_status;
pub mod backup_code;
pub mod credential;
pub mod display_name;
pub mod email;
pub mod phone_number;
pub mod provider;
pub mod totp_secret;

pub use account_status::AccountStatus;
pub use backup_code::BackupCode;
pub use credential::{
    AuthMethod, Credential, EmailCredential, OAuthCredential, PhoneCredential, RegistrationOrigin,
};
pub use display_name::DisplayName;
pub use email::Email;
pub use phone_number::PhoneNumber;
pub use provider::{OAuthProvider, ProviderAccount};
pub use totp_secret::TotpSecret;
