//! Platform Crate - Technical Infrastructure
//!
//! Shared technical foundations with no knowledge of identities or groups:
//! - Cryptographic utilities (HMAC-SHA256, base64url, random codes)
//! - Password hashing (Argon2id with pepper, NIST SP 800-63B policy)
//! - Client context extraction (IP, User-Agent)
//! - Cookie building and parsing

pub mod client;
pub mod cookie;
pub mod crypto;
pub mod password;
