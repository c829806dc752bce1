//! Identity Backend Module
//!
//! Multi-method authentication with account-identity linking.
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, value objects, scoring and merge planning, store traits
//! - `application/` - Use cases (sign-in, linking, deactivation, 2FA, sessions)
//! - `infra/` - PostgreSQL and in-memory stores, in-process gateways
//! - `presentation/` - HTTP handlers, DTOs, router, session middleware
//!
//! ## Features
//! - Sign-in by email + password (with TOTP / backup-code second factor),
//!   phone + one-time code, or OAuth provider profile
//! - Scored link candidates across email, phone, provider account and name
//! - Confirmed and automatic merging of records into one group with a
//!   single master and a denormalized union of linked identifiers
//! - Ownership transfer when deactivating a group master
//! - Signed, self-contained session claims carrying the group aggregate
//!
//! ## Consistency Model
//! - Active records never share an email or phone number
//! - Multi-record writes are versioned batches; conflicts replan from fresh
//!   reads a bounded number of times
//! - Backup codes are removed with a single remove-if-present write

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::{IdentityConfig, SessionConfig};
pub use error::{AuthError, AuthResult};
pub use infra::memory::InMemoryIdentityStore;
pub use infra::postgres::PgIdentityRepository;
pub use presentation::router::{identity_router, identity_router_generic};

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

// Convenience re-exports
pub mod config {
    pub use crate::application::config::*;
}

pub mod models {
    pub use crate::domain::entity::*;
    pub use crate::domain::value_object::*;
    pub use crate::presentation::dto::*;
}

pub mod store {
    pub use crate::infra::memory::InMemoryIdentityStore as MemoryStore;
    pub use crate::infra::postgres::PgIdentityRepository as IdentityStore;
}

pub mod gateways {
    pub use crate::infra::gateway::*;
}

pub mod middleware {
    pub use crate::presentation::middleware::*;
}

#[cfg(test)]
mod tests;
