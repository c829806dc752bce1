//! Application Layer
//!
//! Use cases and application services.

pub mod authenticate;
pub mod config;
pub mod contact_verification;
pub mod deactivate;
pub mod find_candidates;
pub mod link_accounts;
pub mod register;
pub mod second_factor;
pub mod session;
pub(crate) mod support;
pub mod two_factor;
pub mod verify_credential;

// Re-exports
pub use authenticate::{AuthenticateUseCase, SignInOutput};
pub use config::{IdentityConfig, SessionConfig};
pub use contact_verification::ContactVerificationUseCase;
pub use deactivate::{DeactivateAccountUseCase, DeactivateOptions, DeactivateOutput};
pub use find_candidates::{CandidateSearch, FindCandidatesUseCase};
pub use link_accounts::{LinkAccountsUseCase, LinkOutcome};
pub use register::{RegisterInput, RegisterOutput, RegisterUseCase};
pub use second_factor::SecondFactor;
pub use session::{SessionClaims, SessionProjector};
pub use two_factor::{TotpSetupOutput, TwoFactorUseCase};
pub use verify_credential::{VerifiedCredential, VerifyCredentialUseCase};
