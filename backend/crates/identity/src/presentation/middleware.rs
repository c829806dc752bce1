//! Session Middleware
//!
//! Guards authenticated routes. The cookie token is verified and its claims
//! are re-resolved against the current group state before the handler runs;
//! handlers read them from request extensions as `SessionClaims`.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use platform::cookie::{extract_cookie, set_cookie_header};

use crate::error::AuthError;
use crate::presentation::handlers::{CodeGateway, ExchangeGateway, IdentityAppState, IdentityStore};

/// Middleware that requires a valid session
pub async fn require_session<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let Some(token) = extract_cookie(req.headers(), &state.config.session.cookie_name) else {
        return Err(unauthorized());
    };

    let (claims, refreshed) = match state.projector().refresh(&token).await {
        Ok(session) => session,
        Err(AuthError::SessionInvalid) => return Err(unauthorized()),
        Err(e) => return Err(e.into_response()),
    };

    let exp = claims.exp;
    req.extensions_mut().insert(claims);
    let mut response = next.run(req).await;

    // Claims changed since the token was signed (linked elsewhere, etc.)
    if refreshed != token && !response.headers().contains_key(header::SET_COOKIE) {
        let remaining = (exp - Utc::now().timestamp_millis()) / 1000;
        let cookie_config = state.config.session.cookie_config(remaining);
        if let Some(cookie) = set_cookie_header(&cookie_config, &refreshed) {
            response.headers_mut().insert(header::SET_COOKIE, cookie);
        }
    }

    Ok(response)
}

fn unauthorized() -> Response {
    let mut response = AuthError::SessionInvalid.into_response();
    response
        .headers_mut()
        .insert("X-Auth-Required", HeaderValue::from_static("true"));
    response
}
