//! Domain Layer
//!
//! Contains entities, value objects, domain services, and the repository and
//! gateway traits the application layer depends on.

pub mod entity;
pub mod gateway;
pub mod repository;
pub mod service;
pub mod value_object;

// Re-exports
pub use entity::{ActivityEvent, IdentityRecord, LinkCandidate, Principal};
pub use gateway::{OAuthGateway, OAuthProfile, VerificationGateway};
pub use repository::{ActivityRepository, CasOutcome, IdentityRepository};
