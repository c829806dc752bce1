//! Application Configuration
//!
//! Everything a use case needs to know about the deployment is passed in
//! here at construction time.

use std::time::Duration;

/// Re-export SameSite from platform
pub use platform::cookie::SameSite;
use platform::cookie::CookieConfig;
use platform::crypto::random_key;

use crate::domain::value_object::OAuthProvider;

/// Session token and cookie settings
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session cookie name
    pub cookie_name: String,
    /// HMAC-SHA256 key for token signing (32 bytes)
    pub secret: [u8; 32],
    /// Token lifetime
    pub ttl: Duration,
    /// Whether to require Secure cookie
    pub cookie_secure: bool,
    /// SameSite policy
    pub cookie_same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "identity_session".to_string(),
            secret: [0u8; 32],
            ttl: Duration::from_secs(7 * 24 * 3600), // 1 week
            cookie_secure: true,
            cookie_same_site: SameSite::Lax,
        }
    }
}

impl SessionConfig {
    /// Get session TTL in milliseconds
    pub fn ttl_ms(&self) -> i64 {
        self.ttl.as_millis() as i64
    }

    /// Cookie max-age in seconds
    pub fn max_age_secs(&self) -> i64 {
        self.ttl.as_secs() as i64
    }

    /// Session cookie attributes, expiring after `max_age_secs`
    pub fn cookie_config(&self, max_age_secs: i64) -> CookieConfig {
        CookieConfig {
            name: self.cookie_name.clone(),
            secure: self.cookie_secure,
            http_only: true,
            same_site: self.cookie_same_site,
            path: "/".to_string(),
            max_age_secs: Some(max_age_secs.max(0)),
        }
    }
}

/// Identity application configuration
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    /// Minimum confidence for linking without user confirmation
    pub auto_link_threshold: u8,
    /// Minimum confidence for the OAuth sign-in auto-link path
    pub oauth_auto_link_min_confidence: u8,
    /// Attempts for one merge before reporting a store conflict
    pub merge_max_attempts: u32,
    /// Upper bound for each verification / OAuth gateway call
    pub gateway_timeout: Duration,
    /// Providers accepted for OAuth sign-in
    pub enabled_providers: Vec<OAuthProvider>,
    /// Backup codes issued when 2FA is enabled
    pub backup_code_count: usize,
    /// Issuer shown in authenticator apps
    pub totp_issuer: String,
    /// Password pepper (optional, application-wide secret)
    pub password_pepper: Option<Vec<u8>>,
    pub session: SessionConfig,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            auto_link_threshold: 90,
            oauth_auto_link_min_confidence: 95,
            merge_max_attempts: 3,
            gateway_timeout: Duration::from_secs(5),
            enabled_providers: OAuthProvider::ALL.to_vec(),
            backup_code_count: 10,
            totp_issuer: "Identity".to_string(),
            password_pepper: None,
            session: SessionConfig::default(),
        }
    }
}

impl IdentityConfig {
    /// Create config with a random session secret (for development)
    pub fn with_random_secret() -> Self {
        let mut config = Self::default();
        config.session.secret = random_key();
        config
    }

    /// Create config for development (insecure cookie)
    pub fn development() -> Self {
        let mut config = Self::with_random_secret();
        config.session.cookie_secure = false;
        config
    }

    /// Get password pepper as slice
    pub fn pepper(&self) -> Option<&[u8]> {
        self.password_pepper.as_deref()
    }

    pub fn is_provider_enabled(&self, provider: OAuthProvider) -> bool {
        self.enabled_providers.contains(&provider)
    }
}
