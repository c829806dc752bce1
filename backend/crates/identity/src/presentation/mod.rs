//! Presentation Layer
//!
//! HTTP handlers, DTOs, router, and middleware.

pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod router;

pub use handlers::{CodeGateway, ExchangeGateway, IdentityAppState, IdentityStore};
pub use middleware::require_session;
pub use router::{identity_router, identity_router_generic};
