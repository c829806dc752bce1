//! Display Name Value Object
//!
//! Keeps the name as entered plus a canonical form used for matching:
//! NFKC, trimmed, inner whitespace collapsed to one space, lower-cased.

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

const DISPLAY_NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayName {
    original: String,
    canonical: String,
}

impl DisplayName {
    /// `None` for blank input; over-long names are truncated
    pub fn new(raw: impl AsRef<str>) -> Option<Self> {
        let original: String = raw
            .as_ref()
            .trim()
            .chars()
            .filter(|c| !c.is_control())
            .take(DISPLAY_NAME_MAX_CHARS)
            .collect();
        if original.is_empty() {
            return None;
        }
        let canonical = canonicalize(&original);
        Some(Self {
            original,
            canonical,
        })
    }

    pub fn from_db(original: impl Into<String>, canonical: impl Into<String>) -> Self {
        Self {
            original: original.into(),
            canonical: canonical.into(),
        }
    }

    pub fn original(&self) -> &str {
        &self.original
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Same person's name, as far as matching is concerned
    pub fn matches(&self, other: &DisplayName) -> bool {
        self.canonical == other.canonical
    }
}

fn canonicalize(raw: &str) -> String {
    let normalized: String = raw.nfkc().collect();
    normalized
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
