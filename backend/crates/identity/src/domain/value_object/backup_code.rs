//! Backup Code Value Object
//!
//! Single-use fallback for TOTP. Stored upper-case; user input is compared
//! case-insensitively with separators ignored.

use platform::crypto::{UNAMBIGUOUS_ALPHABET, random_code};
use serde::{Deserialize, Serialize};

pub const BACKUP_CODE_LENGTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackupCode(String);

impl BackupCode {
    pub fn generate() -> Self {
        Self(random_code(UNAMBIGUOUS_ALPHABET, BACKUP_CODE_LENGTH))
    }

    pub fn generate_set(count: usize) -> Vec<Self> {
        let mut codes: Vec<Self> = Vec::with_capacity(count);
        while codes.len() < count {
            let code = Self::generate();
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
        codes
    }

    /// Normalize user input; `None` if nothing code-like remains
    pub fn parse(input: &str) -> Option<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| !matches!(c, ' ' | '-'))
            .flat_map(char::to_uppercase)
            .collect();
        if normalized.is_empty() || !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        Some(Self(normalized))
    }

    pub fn from_db(value: impl Into<String>) -> Self {
        Self(value.into().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BackupCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
