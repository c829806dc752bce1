//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `kernel::error::AppError`.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, http,
    http::{Method, header},
};
use base64::Engine;
use base64::engine::general_purpose;
use identity::gateways::{InMemoryVerificationGateway, StaticOAuthGateway};
use identity::{IdentityConfig, PgIdentityRepository, identity_router};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:31113";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,identity=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Database connection
    let database_url =
        env::var("DATABASE_URL").context("DATABASE_URL must be set in environment")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await?;

    tracing::info!("Connected to database");

    // Run migrations
    sqlx::migrate!("../../../database/migrations")
        .run(&pool)
        .await?;

    tracing::info!("Migrations completed");

    let identity_config = load_identity_config()?;
    tracing::info!(
        auto_link_threshold = identity_config.auto_link_threshold,
        providers = ?identity_config.enabled_providers,
        secure_cookie = identity_config.session.cookie_secure,
        "Identity configuration loaded"
    );

    // Code delivery and OAuth exchange stay in process; codes are only
    // revealed in the log for debug builds
    let verification = if cfg!(debug_assertions) {
        InMemoryVerificationGateway::revealing()
    } else {
        InMemoryVerificationGateway::new()
    };
    let oauth = StaticOAuthGateway::new();

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([
            Method::GET,
            Method::POST,
            Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ]))
        .allow_credentials(true);

    // Build router
    let app = Router::new()
        .nest(
            "/api/identity",
            identity_router(
                PgIdentityRepository::new(pool.clone()),
                verification,
                oauth,
                identity_config,
            ),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        );

    // Start server
    let addr: SocketAddr = env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
        .parse()
        .context("LISTEN_ADDR must be a socket address")?;
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Identity settings from the environment
///
/// Debug builds fall back to a random session secret and insecure cookies;
/// release builds require `SESSION_SECRET` (base64, 32 bytes).
fn load_identity_config() -> anyhow::Result<IdentityConfig> {
    let mut config = if cfg!(debug_assertions) {
        IdentityConfig::development()
    } else {
        IdentityConfig::default()
    };

    match env::var("SESSION_SECRET") {
        Ok(secret_b64) => {
            let secret_bytes = Engine::decode(&general_purpose::STANDARD, secret_b64.trim())
                .context("SESSION_SECRET must be base64")?;
            config.session.secret = secret_bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("SESSION_SECRET must decode to 32 bytes"))?;
        }
        Err(_) if cfg!(debug_assertions) => {
            tracing::warn!("SESSION_SECRET not set, using a random secret");
        }
        Err(_) => anyhow::bail!("SESSION_SECRET must be set in production"),
    }

    if let Ok(pepper) = env::var("PASSWORD_PEPPER") {
        config.password_pepper = Some(pepper.into_bytes());
    }

    if let Ok(threshold) = env::var("IDENTITY_AUTO_LINK_THRESHOLD") {
        config.auto_link_threshold = threshold
            .parse::<u8>()
            .ok()
            .filter(|t| *t <= 100)
            .context("IDENTITY_AUTO_LINK_THRESHOLD must be 0..=100")?;
    }

    if let Ok(timeout_ms) = env::var("IDENTITY_GATEWAY_TIMEOUT_MS") {
        let timeout_ms: u64 = timeout_ms
            .parse()
            .context("IDENTITY_GATEWAY_TIMEOUT_MS must be an integer")?;
        config.gateway_timeout = Duration::from_millis(timeout_ms);
    }

    Ok(config)
}
