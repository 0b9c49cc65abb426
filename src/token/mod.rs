//! KimVan credential detection and cookie normalisation.
//!
//! Clients capture KimVan credentials in several shapes:
//!
//! - a raw JWT (`eyJ...` with three segments)
//! - an encrypted AuthJS session token (JWE, `A256CBC-HS512`)
//! - a full browser cookie header carrying the AuthJS cookies
//!
//! Everything here is pure string handling. Malformed input never panics;
//! failures come back as [`CodecError`] so callers branch on them explicitly.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

#[cfg(test)]
mod tests;

/// Base64url encoding of `{"`, the first bytes of every JOSE header.
pub const JWT_PREFIX: &str = "eyJ";

/// Content-encryption algorithm AuthJS uses for its session JWE.
pub const SESSION_ENC_MARKER: &str = "A256CBC-HS512";

pub const CSRF_COOKIE: &str = "__Host-authjs.csrf-token";
pub const CALLBACK_COOKIE: &str = "__Secure-authjs.callback-url";
pub const SESSION_COOKIE: &str = "__Secure-authjs.session-token";

/// Shape of a credential string as submitted by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectedType {
    Jwt,
    Session,
    FullCookie,
    #[default]
    Unknown,
}

/// Codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("token is empty")]
    Empty,
    #[error("no session token found in cookie string")]
    MissingSessionToken,
}

/// Result of splitting a cookie header (or a bare token) into its parts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedCookie {
    pub kind: DetectedType,
    pub csrf_token: Option<String>,
    pub callback_url: Option<String>,
    pub session_token: Option<String>,
    /// Cookies other than the three AuthJS ones, in header order.
    pub extra: Vec<(String, String)>,
    /// Pre-built header, replayed verbatim. Set when `extra` is non-empty.
    pub cookie_string: Option<String>,
}

impl ParsedCookie {
    /// True when the input carried more than a bare session token.
    pub fn has_cookie_components(&self) -> bool {
        self.csrf_token.is_some() || self.callback_url.is_some()
    }
}

/// Values substituted for missing CSRF and callback cookies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieDefaults {
    pub csrf_token: String,
    pub callback_url: String,
}

impl Default for CookieDefaults {
    fn default() -> Self {
        Self {
            csrf_token: "kimvan-csrf".to_string(),
            callback_url: "https://kimvan.id.vn/".to_string(),
        }
    }
}

/// Input accepted by [`build_full_cookie_string`].
#[derive(Debug, Clone, Copy)]
pub enum CookieSource<'a> {
    Raw(&'a str),
    Parsed(&'a ParsedCookie),
}

impl<'a> From<&'a str> for CookieSource<'a> {
    fn from(raw: &'a str) -> Self {
        CookieSource::Raw(raw)
    }
}

impl<'a> From<&'a ParsedCookie> for CookieSource<'a> {
    fn from(parsed: &'a ParsedCookie) -> Self {
        CookieSource::Parsed(parsed)
    }
}

/// Classify a credential string.
///
/// Checks run in order: plain JWT, AuthJS session JWE, full cookie header.
pub fn detect_token_type(token: &str) -> DetectedType {
    let token = token.trim();

    if token.starts_with(JWT_PREFIX) && token.split('.').count() == 3 {
        return DetectedType::Jwt;
    }

    if token.starts_with(JWT_PREFIX) && header_contains(token, SESSION_ENC_MARKER) {
        return DetectedType::Session;
    }

    if token.contains(SESSION_COOKIE) {
        return DetectedType::FullCookie;
    }

    DetectedType::Unknown
}

/// Split a cookie header into the AuthJS fields.
///
/// A bare token (JWT prefix, no `=`) short-circuits to a single-field record.
pub fn parse_cookie_string(raw: &str) -> Result<ParsedCookie, CodecError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(CodecError::Empty);
    }

    if looks_like_bare_token(raw) {
        return Ok(ParsedCookie {
            kind: detect_token_type(raw),
            session_token: Some(raw.to_string()),
            ..Default::default()
        });
    }

    let mut parsed = ParsedCookie {
        kind: DetectedType::FullCookie,
        ..Default::default()
    };
    let mut pairs = Vec::new();

    for pair in raw.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        let (name, value) = (name.trim(), value.trim());
        if name.is_empty() {
            continue;
        }

        match name {
            CSRF_COOKIE => parsed.csrf_token = non_empty(value),
            CALLBACK_COOKIE => parsed.callback_url = non_empty(value),
            SESSION_COOKIE => parsed.session_token = non_empty(value),
            _ => parsed.extra.push((name.to_string(), value.to_string())),
        }
        pairs.push(format!("{}={}", name, value));
    }

    if parsed.session_token.is_none() {
        return Err(CodecError::MissingSessionToken);
    }

    if !parsed.extra.is_empty() {
        parsed.cookie_string = Some(pairs.join("; "));
    }

    Ok(parsed)
}

/// Return just the session-token component of a cookie header or bare token.
pub fn extract_session_token_from_cookie(raw: &str) -> Result<String, CodecError> {
    parse_cookie_string(raw)?
        .session_token
        .ok_or(CodecError::MissingSessionToken)
}

/// Rebuild the three-field AuthJS cookie header.
///
/// A parsed record with a pre-built `cookie_string` is returned verbatim.
/// Unparseable raw input is treated as a bare session-token value.
pub fn build_full_cookie_string<'a>(
    source: impl Into<CookieSource<'a>>,
    defaults: &CookieDefaults,
) -> String {
    match source.into() {
        CookieSource::Parsed(parsed) => assemble(parsed, defaults),
        CookieSource::Raw(raw) => match parse_cookie_string(raw) {
            Ok(parsed) => assemble(&parsed, defaults),
            Err(_) => assemble(
                &ParsedCookie {
                    session_token: non_empty(raw.trim()),
                    ..Default::default()
                },
                defaults,
            ),
        },
    }
}

/// Read the `exp` claim of a plain JWT.
pub fn decode_jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    if detect_token_type(token) != DetectedType::Jwt {
        return None;
    }

    let payload = token.trim().split('.').nth(1).and_then(decode_segment)?;
    let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    Utc.timestamp_opt(exp, 0).single()
}

fn assemble(parsed: &ParsedCookie, defaults: &CookieDefaults) -> String {
    if let Some(prebuilt) = &parsed.cookie_string {
        return prebuilt.clone();
    }

    format!(
        "{}={}; {}={}; {}={}",
        CSRF_COOKIE,
        parsed.csrf_token.as_deref().unwrap_or(&defaults.csrf_token),
        CALLBACK_COOKIE,
        parsed
            .callback_url
            .as_deref()
            .unwrap_or(&defaults.callback_url),
        SESSION_COOKIE,
        parsed.session_token.as_deref().unwrap_or_default(),
    )
}

fn looks_like_bare_token(raw: &str) -> bool {
    raw.starts_with(JWT_PREFIX) && !raw.contains('=')
}

fn header_contains(token: &str, marker: &str) -> bool {
    token
        .split('.')
        .next()
        .and_then(decode_segment)
        .map(|header| String::from_utf8_lossy(&header).contains(marker))
        .unwrap_or(false)
}

fn decode_segment(segment: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(segment.trim_end_matches('=')).ok()
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
