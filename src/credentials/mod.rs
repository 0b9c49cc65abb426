//! KimVan credential storage and upstream auth header assembly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │       CredentialChain                    │
//! │  - providers tried in priority order     │
//! │  - first usable headers win              │
//! └─────────────────────────────────────────┘
//!          ↓                    ↓
//! ┌────────────────────┐  ┌────────────────────┐
//! │ StoredTokenProvider│  │ AuthLogProvider    │
//! │  - TokenStore file │  │  - logs directory  │
//! │  - expiry checked  │  │  - 5 minute memo   │
//! └────────────────────┘  └────────────────────┘
//! ```
//!
//! The token store holds exactly one [`StoredToken`], written wholesale on
//! every submission. Expired tokens are never swept; they are simply treated
//! as unusable when read.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

mod providers;
mod storage;

pub use providers::{
    headers_for_token, AuthHeaders, AuthLogProvider, CredentialChain, CredentialError,
    CredentialProvider, StoredTokenProvider,
};
pub use storage::{StoreError, TokenStore};

pub const DAY_MS: i64 = 86_400_000;
pub const HOUR_MS: i64 = 3_600_000;

/// Credential strategy used when talking to KimVan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    /// Plain JWT, sent as a Bearer header.
    Jwt,
    /// AuthJS session token, sent as the three-field cookie header.
    Session,
    /// Full browser cookie header, replayed verbatim.
    Cookies,
    Unknown,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Jwt => "jwt",
            TokenType::Session => "session",
            TokenType::Cookies => "cookies",
            TokenType::Unknown => "unknown",
        }
    }
}

/// The single persisted KimVan credential.
///
/// Timestamps are epoch milliseconds. Field names match the JSON document
/// written by the capture flow, including its camelCase auxiliary fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub value: String,
    pub token_type: TokenType,
    pub timestamp: i64,
    pub expiry_date: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_string: Option<String>,

    #[serde(rename = "accessToken", default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken", default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_email: Option<String>,
    #[serde(rename = "tokenExpiryTime", default, skip_serializing_if = "Option::is_none")]
    pub token_expiry_time: Option<i64>,
}

impl StoredToken {
    /// Create a token stamped at `now_ms`.
    ///
    /// `expiry_ms` is used only when it lies after `now_ms`; otherwise the
    /// token gets `default_validity_ms`, keeping `expiry_date > timestamp`.
    pub fn new(
        value: impl Into<String>,
        token_type: TokenType,
        now_ms: i64,
        expiry_ms: Option<i64>,
        default_validity_ms: i64,
    ) -> Self {
        let expiry_date = expiry_ms
            .filter(|expiry| *expiry > now_ms)
            .unwrap_or(now_ms + default_validity_ms.max(1));

        Self {
            value: value.into(),
            token_type,
            timestamp: now_ms,
            expiry_date,
            csrf_token: None,
            callback_url: None,
            session_token: None,
            cookie_string: None,
            access_token: None,
            refresh_token: None,
            auth_email: None,
            token_expiry_time: None,
        }
    }

    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        self.expiry_date > now_ms
    }

    pub fn has_cookie_components(&self) -> bool {
        self.csrf_token.is_some() || self.callback_url.is_some()
    }

    pub fn has_auth_info(&self) -> bool {
        self.access_token.is_some() || self.refresh_token.is_some() || self.auth_email.is_some()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expiry_date).single()
    }

    /// Whole days and leftover hours until expiry, clamped at zero.
    pub fn time_remaining_at(&self, now_ms: i64) -> (i64, i64) {
        let remaining = (self.expiry_date - now_ms).max(0);
        (remaining / DAY_MS, (remaining % DAY_MS) / HOUR_MS)
    }
}
