//! In-Process Gateways
//!
//! Code delivery and OAuth exchange stand-ins for local runs and tests.
//! Delivery is a log line; codes are single-use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use platform::crypto::{constant_time_eq, random_digits};

use crate::domain::entity::Destination;
use crate::domain::gateway::{OAuthGateway, OAuthProfile, VerificationGateway};
use crate::domain::value_object::OAuthProvider;
use crate::error::{AuthError, AuthResult};

pub const VERIFICATION_CODE_LENGTH: usize = 6;

fn destination_key(destination: &Destination) -> String {
    match destination {
        Destination::Email(email) => format!("email:{}", email),
        Destination::Phone(phone) => format!("phone:{}", phone),
    }
}

/// Keeps issued codes in memory and logs delivery
#[derive(Clone, Default)]
pub struct InMemoryVerificationGateway {
    codes: Arc<Mutex<HashMap<String, String>>>,
    /// Log the code itself (development only)
    reveal_codes: bool,
    delay: Option<Duration>,
}

impl InMemoryVerificationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log issued codes in clear text
    pub fn revealing() -> Self {
        Self {
            reveal_codes: true,
            ..Self::default()
        }
    }

    /// Answer every call only after `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Register a known code for a destination
    pub fn preset(&self, destination: &Destination, code: impl Into<String>) {
        if let Ok(mut codes) = self.codes.lock() {
            codes.insert(destination_key(destination), code.into());
        }
    }

    /// Outstanding code for a destination
    pub fn last_code(&self, destination: &Destination) -> Option<String> {
        self.codes
            .lock()
            .ok()
            .and_then(|codes| codes.get(&destination_key(destination)).cloned())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl VerificationGateway for InMemoryVerificationGateway {
    async fn send_code(&self, destination: &Destination) -> AuthResult<()> {
        self.pause().await;

        let code = random_digits(VERIFICATION_CODE_LENGTH);
        if self.reveal_codes {
            tracing::info!(destination = %destination.masked(), code = %code, "Verification code issued");
        } else {
            tracing::debug!(destination = %destination.masked(), "Verification code issued");
        }

        self.codes
            .lock()
            .map_err(|_| AuthError::Gateway("Code registry unavailable".to_string()))?
            .insert(destination_key(destination), code);
        Ok(())
    }

    async fn check_code(&self, destination: &Destination, code: &str) -> AuthResult<bool> {
        self.pause().await;

        let mut codes = self
            .codes
            .lock()
            .map_err(|_| AuthError::Gateway("Code registry unavailable".to_string()))?;
        let key = destination_key(destination);
        let matches = codes
            .get(&key)
            .is_some_and(|expected| constant_time_eq(expected.as_bytes(), code.as_bytes()));
        if matches {
            codes.remove(&key);
        }
        Ok(matches)
    }
}

/// Authorization codes registered up front, each exchangeable once
#[derive(Clone, Default)]
pub struct StaticOAuthGateway {
    profiles: Arc<Mutex<HashMap<(OAuthProvider, String), OAuthProfile>>>,
}

impl StaticOAuthGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: OAuthProvider, code: impl Into<String>, profile: OAuthProfile) {
        if let Ok(mut profiles) = self.profiles.lock() {
            profiles.insert((provider, code.into()), profile);
        }
    }
}

impl OAuthGateway for StaticOAuthGateway {
    async fn exchange_token(
        &self,
        provider: OAuthProvider,
        code: &str,
    ) -> AuthResult<Option<OAuthProfile>> {
        let mut profiles = self
            .profiles
            .lock()
            .map_err(|_| AuthError::Gateway("Profile registry unavailable".to_string()))?;
        Ok(profiles.remove(&(provider, code.to_string())))
    }
}
