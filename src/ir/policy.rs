//! Policy attachments carried by APIs and rules.

use super::Base64Bytes;
use serde::{Deserialize, Serialize};

/// Discriminant used to look a policy up on a rule or API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    BasicAuth,
    JwtAuth,
    LocalRateLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Policy {
    BasicAuth(BasicAuthPolicy),
    JwtAuth(JwtPolicy),
    LocalRateLimit(RateLimitPolicy),
}

impl Policy {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::BasicAuth(_) => PolicyKind::BasicAuth,
            Policy::JwtAuth(_) => PolicyKind::JwtAuth,
            Policy::LocalRateLimit(_) => PolicyKind::LocalRateLimit,
        }
    }
}

/// htpasswd credentials; base64 encoded in YAML/JSON documents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthPolicy {
    pub users: Base64Bytes,

    /// Header receiving the authenticated user name
    #[serde(default)]
    pub forward_username_header: Option<String>,
}

impl BasicAuthPolicy {
    pub fn from_htpasswd(lines: &str) -> Self {
        Self { users: Base64Bytes(lines.as_bytes().to_vec()), forward_username_header: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtPolicy {
    /// Provider key inside the generated filter config
    pub provider: String,
    pub issuer: String,
    #[serde(default)]
    pub audiences: Vec<String>,
    /// HTTPS or HTTP location of the key set
    pub jwks_uri: String,
    #[serde(default = "JwtPolicy::default_jwks_timeout_ms")]
    pub jwks_timeout_ms: u64,
    /// Keep the token on the upstream request
    #[serde(default)]
    pub forward: bool,
}

impl JwtPolicy {
    const fn default_jwks_timeout_ms() -> u64 {
        1000
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RateLimitUnit {
    Second,
    Minute,
    Hour,
}

impl RateLimitUnit {
    pub fn seconds(self) -> i64 {
        match self {
            RateLimitUnit::Second => 1,
            RateLimitUnit::Minute => 60,
            RateLimitUnit::Hour => 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitPolicy {
    pub requests_per_unit: u32,
    pub unit: RateLimitUnit,
}
