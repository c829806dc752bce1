//! Client identification utilities
//!
//! Request origin details attached to security audit events.

use axum::http::{HeaderMap, header};
use std::net::IpAddr;

/// Longest User-Agent kept for audit metadata
const MAX_USER_AGENT_LEN: usize = 256;

/// Where a request came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    /// Client IP (first X-Forwarded-For hop, else the socket peer)
    pub ip: Option<IpAddr>,
    /// User-Agent header, truncated
    pub user_agent: Option<String>,
}

impl ClientContext {
    pub fn new(ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        Self { ip, user_agent }
    }

    /// Build from request headers and the direct peer address
    pub fn from_headers(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Self {
        let user_agent = headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(truncate_user_agent);

        Self {
            ip: extract_client_ip(headers, direct_ip),
            user_agent,
        }
    }

    pub fn ip_string(&self) -> Option<String> {
        self.ip.map(|ip| ip.to_string())
    }
}

fn truncate_user_agent(raw: &str) -> String {
    raw.chars().take(MAX_USER_AGENT_LEN).collect()
}

/// Client IP address, preferring the first X-Forwarded-For entry
pub fn extract_client_ip(headers: &HeaderMap, direct_ip: Option<IpAddr>) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok())
        .or(direct_ip)
}
