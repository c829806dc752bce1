//! HTTP Handlers

use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::{Extension, Json};
use chrono::Utc;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use platform::client::ClientContext;
use platform::cookie::{delete_cookie_header, extract_cookie, set_cookie_header};
use platform::password::ClearTextPassword;

use crate::application::config::IdentityConfig;
use crate::application::{
    AuthenticateUseCase, ContactVerificationUseCase, DeactivateAccountUseCase, DeactivateOptions,
    FindCandidatesUseCase, LinkAccountsUseCase, RegisterInput, RegisterUseCase, SessionClaims,
    SessionProjector, SignInOutput, TwoFactorUseCase,
};
use crate::domain::entity::{Destination, Principal};
use crate::domain::gateway::{OAuthGateway, VerificationGateway};
use crate::domain::repository::{ActivityRepository, IdentityRepository};
use crate::domain::value_object::{
    Credential, Email, EmailCredential, OAuthProvider, PhoneCredential, PhoneNumber,
};
use crate::error::{AuthError, AuthResult};
use crate::presentation::dto::{
    BackupCodesResponse, CandidatesResponse, ContactCodeRequest, ContactConfirmRequest,
    DeactivateRequest, DeactivateResponse, LinkRequest, LinkResponse, OAuthSignInRequest,
    PasswordSignInRequest, PhoneCodeRequest, PhoneSignInRequest, RegisterRequest,
    RegisterResponse, SessionStatusResponse, SignInResponse, TotpSetupResponse,
    TwoFactorCodeRequest,
};

/// Identity and audit store usable from handlers
pub trait IdentityStore: IdentityRepository + ActivityRepository + Send + Sync + 'static {}

impl<T> IdentityStore for T where T: IdentityRepository + ActivityRepository + Send + Sync + 'static {}

/// Code delivery usable from handlers
pub trait CodeGateway: VerificationGateway + Send + Sync + 'static {}

impl<T> CodeGateway for T where T: VerificationGateway + Send + Sync + 'static {}

/// OAuth exchange usable from handlers
pub trait ExchangeGateway: OAuthGateway + Send + Sync + 'static {}

impl<T> ExchangeGateway for T where T: OAuthGateway + Send + Sync + 'static {}

/// Shared state for identity handlers
pub struct IdentityAppState<S, V, O> {
    pub store: Arc<S>,
    pub verification: Arc<V>,
    pub oauth: Arc<O>,
    pub config: Arc<IdentityConfig>,
}

impl<S, V, O> Clone for IdentityAppState<S, V, O> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            verification: self.verification.clone(),
            oauth: self.oauth.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S, V, O> IdentityAppState<S, V, O>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    pub fn new(store: S, verification: V, oauth: O, config: IdentityConfig) -> Self {
        Self {
            store: Arc::new(store),
            verification: Arc::new(verification),
            oauth: Arc::new(oauth),
            config: Arc::new(config),
        }
    }

    fn authenticator(&self) -> AuthenticateUseCase<S, S, V, O> {
        AuthenticateUseCase::new(
            self.store.clone(),
            self.store.clone(),
            self.verification.clone(),
            self.oauth.clone(),
            self.config.clone(),
        )
    }

    fn contacts(&self) -> ContactVerificationUseCase<S, S, V> {
        ContactVerificationUseCase::new(
            self.store.clone(),
            self.store.clone(),
            self.verification.clone(),
            self.config.clone(),
        )
    }

    fn two_factor(&self) -> TwoFactorUseCase<S, S> {
        TwoFactorUseCase::new(self.store.clone(), self.store.clone(), self.config.clone())
    }

    pub(crate) fn projector(&self) -> SessionProjector<S> {
        SessionProjector::new(self.store.clone(), self.config.clone())
    }
}

// ============================================================================
// Sign In
// ============================================================================

/// POST /signin/password
pub async fn sign_in_password<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    headers: HeaderMap,
    connect: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(req): Json<PasswordSignInRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let credential = Credential::Email(EmailCredential {
        email: Email::new(&req.email)?,
        password: ClearTextPassword::for_verification(req.password),
        two_factor_code: req.two_factor_code,
    });

    let output = state
        .authenticator()
        .execute(credential, client_context(&headers, connect))
        .await?;

    signed_in(&state.config, &output)
}

/// POST /signin/phone
pub async fn sign_in_phone<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    headers: HeaderMap,
    connect: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(req): Json<PhoneSignInRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let credential = Credential::Phone(PhoneCredential {
        phone_number: PhoneNumber::parse(&req.phone_number)?,
        code: req.code,
    });

    let output = state
        .authenticator()
        .execute(credential, client_context(&headers, connect))
        .await?;

    signed_in(&state.config, &output)
}

/// POST /signin/phone/code
///
/// Always 204 for a well-formed number, registered or not.
pub async fn send_phone_code<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Json(req): Json<PhoneCodeRequest>,
) -> AuthResult<StatusCode>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let phone = PhoneNumber::parse(&req.phone_number)?;
    state.contacts().send_code(&Destination::Phone(phone)).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /signin/oauth
pub async fn sign_in_oauth<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    headers: HeaderMap,
    connect: Option<Extension<ConnectInfo<SocketAddr>>>,
    Json(req): Json<OAuthSignInRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let provider = OAuthProvider::from_str(&req.provider)?;

    let output = state
        .authenticator()
        .authenticate_oauth_code(provider, &req.code, client_context(&headers, connect))
        .await?;

    signed_in(&state.config, &output)
}

// ============================================================================
// Registration
// ============================================================================

/// POST /register
pub async fn register<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Json(req): Json<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<RegisterResponse>)>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let use_case = RegisterUseCase::new(
        state.store.clone(),
        state.store.clone(),
        state.verification.clone(),
        state.config.clone(),
    );

    let output = use_case
        .execute(RegisterInput {
            email: req.email,
            password: req.password,
            phone_number: req.phone_number,
            phone_code: req.phone_code,
            name: req.name,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            principal: output.principal,
            candidates: output.candidates,
        }),
    ))
}

// ============================================================================
// Session
// ============================================================================

/// POST /signout
///
/// Tokens are self-contained; signing out clears the cookie.
pub async fn sign_out<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
) -> AuthResult<impl IntoResponse>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    Ok((StatusCode::NO_CONTENT, clear_cookie(&state.config)?))
}

/// GET /session
pub async fn session_status<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    headers: HeaderMap,
) -> AuthResult<Json<SessionStatusResponse>>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let session = match extract_cookie(&headers, &state.config.session.cookie_name) {
        Some(token) => match state.projector().refresh(&token).await {
            Ok((claims, _)) => Some(claims),
            Err(e) if e.is_infrastructure() => return Err(e),
            Err(_) => None,
        },
        None => None,
    };

    Ok(Json(SessionStatusResponse {
        authenticated: session.is_some(),
        session,
    }))
}

// ============================================================================
// Linking (requires authentication)
// ============================================================================

/// GET /links/candidates
pub async fn list_candidates<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
) -> AuthResult<Json<CandidatesResponse>>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let candidates = FindCandidatesUseCase::new(state.store.clone())
        .for_user(&claims.sub)
        .await?;

    Ok(Json(CandidatesResponse { candidates }))
}

/// POST /links
///
/// Only current candidates sharing a verified attribute, or accounts already
/// in the caller's group, can be linked.
pub async fn link_accounts<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    Json(req): Json<LinkRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    FindCandidatesUseCase::new(state.store.clone())
        .check_confirmable(&claims.sub, &req.secondary_account_ids)
        .await?;

    let use_case = LinkAccountsUseCase::new(
        state.store.clone(),
        state.store.clone(),
        state.config.clone(),
    );
    let outcome = use_case
        .link_accounts(&claims.sub, &req.secondary_account_ids)
        .await?;

    let cookie = refreshed_cookie(&state, &headers).await?;
    Ok((StatusCode::OK, cookie, Json(LinkResponse::from(outcome))).into_response())
}

// ============================================================================
// Deactivation (requires authentication)
// ============================================================================

/// POST /account/deactivate
pub async fn deactivate<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<DeactivateRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let use_case = DeactivateAccountUseCase::new(
        state.store.clone(),
        state.store.clone(),
        state.config.clone(),
    );
    let output = use_case
        .execute(
            &claims.sub,
            DeactivateOptions {
                transfer_ownership: req.transfer_ownership,
                transfer_to: req.transfer_to,
            },
        )
        .await?;

    Ok((
        StatusCode::OK,
        clear_cookie(&state.config)?,
        Json(DeactivateResponse {
            user_id: output.user_id,
            new_master_id: output.new_master_id,
        }),
    )
        .into_response())
}

// ============================================================================
// Contact Verification (requires authentication)
// ============================================================================

/// POST /contacts/code
pub async fn send_contact_code<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Json(req): Json<ContactCodeRequest>,
) -> AuthResult<StatusCode>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let destination = parse_destination(req.email, req.phone_number)?;
    state.contacts().send_code(&destination).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /contacts/confirm
pub async fn confirm_contact<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    Json(req): Json<ContactConfirmRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let destination = parse_destination(req.email, req.phone_number)?;
    let principal: Principal = state
        .contacts()
        .confirm(&claims.sub, &destination, &req.code)
        .await?;

    let cookie = refreshed_cookie(&state, &headers).await?;
    Ok((StatusCode::OK, cookie, Json(principal)).into_response())
}

// ============================================================================
// Two-Factor (requires authentication)
// ============================================================================

/// POST /two-factor/setup
pub async fn two_factor_setup<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
) -> AuthResult<Json<TotpSetupResponse>>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let output = state.two_factor().setup(&claims.sub).await?;

    Ok(Json(TotpSetupResponse::from(output)))
}

/// POST /two-factor/enable
pub async fn two_factor_enable<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    Json(req): Json<TwoFactorCodeRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let codes = state.two_factor().enable(&claims.sub, &req.code).await?;

    let cookie = refreshed_cookie(&state, &headers).await?;
    Ok((StatusCode::OK, cookie, Json(BackupCodesResponse::from(codes))).into_response())
}

/// POST /two-factor/disable
pub async fn two_factor_disable<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    headers: HeaderMap,
    Json(req): Json<TwoFactorCodeRequest>,
) -> AuthResult<Response>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    state.two_factor().disable(&claims.sub, &req.code).await?;

    let cookie = refreshed_cookie(&state, &headers).await?;
    Ok((StatusCode::NO_CONTENT, cookie).into_response())
}

/// POST /two-factor/backup-codes
pub async fn regenerate_backup_codes<S, V, O>(
    State(state): State<IdentityAppState<S, V, O>>,
    Extension(claims): Extension<SessionClaims>,
    Json(req): Json<TwoFactorCodeRequest>,
) -> AuthResult<Json<BackupCodesResponse>>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let codes = state
        .two_factor()
        .regenerate_backup_codes(&claims.sub, &req.code)
        .await?;

    Ok(Json(BackupCodesResponse::from(codes)))
}

// ============================================================================
// Helper Functions
// ============================================================================

fn client_context(
    headers: &HeaderMap,
    connect: Option<Extension<ConnectInfo<SocketAddr>>>,
) -> ClientContext {
    let direct_ip = connect.map(|Extension(ConnectInfo(addr))| addr.ip());
    ClientContext::from_headers(headers, direct_ip)
}

/// Email wins when both are given
fn parse_destination(email: Option<String>, phone: Option<String>) -> AuthResult<Destination> {
    let email = email.filter(|e| !e.trim().is_empty());
    let phone = phone.filter(|p| !p.trim().is_empty());

    match (email, phone) {
        (Some(email), _) => Ok(Destination::Email(Email::new(email)?)),
        (None, Some(phone)) => Ok(Destination::Phone(PhoneNumber::parse(phone)?)),
        (None, None) => Err(AuthError::MissingCredentials("email")),
    }
}

/// Seconds until `exp_ms`
fn remaining_secs(exp_ms: i64) -> i64 {
    (exp_ms - Utc::now().timestamp_millis()) / 1000
}

fn session_cookie(config: &IdentityConfig, token: &str, exp_ms: i64) -> AuthResult<HeaderValue> {
    let cookie_config = config.session.cookie_config(remaining_secs(exp_ms));
    set_cookie_header(&cookie_config, token)
        .ok_or_else(|| AuthError::Internal("Session cookie is not a valid header".to_string()))
}

fn clear_cookie(config: &IdentityConfig) -> AuthResult<[(header::HeaderName, HeaderValue); 1]> {
    let cookie_config = config.session.cookie_config(0);
    let value = delete_cookie_header(&cookie_config)
        .ok_or_else(|| AuthError::Internal("Session cookie is not a valid header".to_string()))?;
    Ok([(header::SET_COOKIE, value)])
}

fn signed_in(config: &IdentityConfig, output: &SignInOutput) -> AuthResult<Response> {
    let cookie = session_cookie(config, &output.session_token, output.claims.exp)?;

    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie)],
        Json(SignInResponse::from(output)),
    )
        .into_response())
}

/// Re-sign the caller's session after a change to its group or 2FA state
async fn refreshed_cookie<S, V, O>(
    state: &IdentityAppState<S, V, O>,
    headers: &HeaderMap,
) -> AuthResult<AppendHeaders<Vec<(header::HeaderName, HeaderValue)>>>
where
    S: IdentityStore,
    V: CodeGateway,
    O: ExchangeGateway,
{
    let Some(token) = extract_cookie(headers, &state.config.session.cookie_name) else {
        return Ok(AppendHeaders(Vec::new()));
    };
    let (claims, token) = state.projector().refresh(&token).await?;
    let cookie = session_cookie(&state.config, &token, claims.exp)?;
    Ok(AppendHeaders(vec![(header::SET_COOKIE, cookie)]))
}
