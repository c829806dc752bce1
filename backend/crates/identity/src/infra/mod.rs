//! Infrastructure Layer
//!
//! Store and gateway implementations of the domain traits.

pub mod gateway;
pub mod memory;
pub mod postgres;

pub use gateway::{InMemoryVerificationGateway, StaticOAuthGateway};
pub use memory::InMemoryIdentityStore;
pub use postgres::PgIdentityRepository;
