//! Identity Router

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::application::config::IdentityConfig;
use crate::infra::gateway::{InMemoryVerificationGateway, StaticOAuthGateway};
use crate::infra::postgres::PgIdentityRepository;
use crate::presentation::handlers::{
    self, CodeGateway, ExchangeGateway, IdentityAppState, IdentityStore,
};
use crate::presentation::middleware::require_session;

/// Create the identity router over PostgreSQL with in-process gateways
pub fn identity_router(
    repo: PgIdentityRepository,
    verification: InMemoryVerificationGateway,
    oauth: StaticOAuthGateway,
    config: IdentityConfig,
) -> Router {
    identity_router_generic(IdentityAppState::new(repo, verification, oauth, config))
}

/// Create the identity router for any store and gateway implementation
pub fn identity_router_generic<S, V, O>(state: IdentityAppState<S, V, O>) -> Router
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let protected = Router::new()
        .route("/links/candidates", get(handlers::list_candidates::<S, V, O>))
        .route("/links", post(handlers::link_accounts::<S, V, O>))
        .route("/account/deactivate", post(handlers::deactivate::<S, V, O>))
        .route("/contacts/code", post(handlers::send_contact_code::<S, V, O>))
        .route("/contacts/confirm", post(handlers::confirm_contact::<S, V, O>))
        .route("/two-factor/setup", post(handlers::two_factor_setup::<S, V, O>))
        .route("/two-factor/enable", post(handlers::two_factor_enable::<S, V, O>))
        .route("/two-factor/disable", post(handlers::two_factor_disable::<S, V, O>))
        .route(
            "/two-factor/backup-codes",
            post(handlers::regenerate_backup_codes::<S, V, O>),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session::<S, V, O>,
        ));

    Router::new()
        .route("/signin/password", post(handlers::sign_in_password::<S, V, O>))
        .route("/signin/phone", post(handlers::sign_in_phone::<S, V, O>))
        .route("/signin/phone/code", post(handlers::send_phone_code::<S, V, O>))
        .route("/signin/oauth", post(handlers::sign_in_oauth::<S, V, O>))
        .route("/register", post(handlers::register::<S, V, O>))
        .route("/signout", post(handlers::sign_out::<S, V, O>))
        .route("/session", get(handlers::session_status::<S, V, O>))
        .merge(protected)
        .with_state(state)
}
