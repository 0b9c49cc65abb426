//! Credential providers feeding upstream auth headers.
//!
//! Two independent sources exist: the stored token file, and a legacy
//! directory of captured auth-info logs. Each is a [`CredentialProvider`];
//! [`CredentialChain`] asks them in priority order.

use super::{StoreError, StoredToken, TokenStore, TokenType};
use crate::config::AuthConfig;
use crate::token::{build_full_cookie_string, CookieDefaults, ParsedCookie};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Ordered header name/value pairs to attach to an upstream request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthHeaders(Vec<(String, String)>);

impl AuthHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.0.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Provider failures. The chain logs these and moves on.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to read auth log directory: {0}")]
    Io(#[from] io::Error),
    #[error("malformed auth log {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// A source of upstream auth headers.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Short identifier used in config and logs.
    fn name(&self) -> &str;

    /// Headers from this source, or `Ok(None)` when it has nothing usable.
    async fn headers(&self) -> Result<Option<AuthHeaders>, CredentialError>;
}

/// Build the auth headers a stored token implies.
///
/// JWTs become a Bearer header; session and cookie tokens become a cookie
/// header. Unknown tokens yield nothing.
pub fn headers_for_token(token: &StoredToken, defaults: &CookieDefaults) -> Option<AuthHeaders> {
    let mut headers = AuthHeaders::new();

    match token.token_type {
        TokenType::Jwt => {
            headers.insert("authorization", format!("Bearer {}", token.value));
        }
        TokenType::Session | TokenType::Cookies => {
            let cookie = match &token.cookie_string {
                Some(prebuilt) => prebuilt.clone(),
                None => build_full_cookie_string(
                    &ParsedCookie {
                        csrf_token: token.csrf_token.clone(),
                        callback_url: token.callback_url.clone(),
                        session_token: Some(
                            token.session_token.clone().unwrap_or_else(|| token.value.clone()),
                        ),
                        ..Default::default()
                    },
                    defaults,
                ),
            };
            headers.insert("cookie", cookie);
        }
        TokenType::Unknown => return None,
    }

    Some(headers)
}

/// Headers from the token store. Missing or expired tokens yield nothing.
pub struct StoredTokenProvider {
    store: Arc<TokenStore>,
    defaults: CookieDefaults,
}

impl StoredTokenProvider {
    pub fn new(store: Arc<TokenStore>, defaults: CookieDefaults) -> Self {
        Self { store, defaults }
    }
}

#[async_trait]
impl CredentialProvider for StoredTokenProvider {
    fn name(&self) -> &str {
        "stored_token"
    }

    async fn headers(&self) -> Result<Option<AuthHeaders>, CredentialError> {
        let token = match self.store.load().await {
            Ok(token) => token,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if !token.is_valid_at(Utc::now().timestamp_millis()) {
            debug!(expiry_date = token.expiry_date, "Stored token expired, skipping");
            return Ok(None);
        }

        Ok(headers_for_token(&token, &self.defaults))
    }
}

/// One captured auth-info document.
#[derive(Debug, Default, Deserialize)]
struct AuthLogRecord {
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    cookies: Vec<JarCookie>,
}

#[derive(Debug, Deserialize)]
struct JarCookie {
    name: String,
    value: String,
}

impl AuthLogRecord {
    /// Bearer header if captured, else a cookie header from the jar.
    fn to_headers(&self) -> Option<AuthHeaders> {
        let header = |name: &str| {
            self.headers
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.trim())
                .filter(|value| !value.is_empty())
        };

        let mut headers = AuthHeaders::new();

        if let Some(bearer) = header("authorization")
            .filter(|v| v.len() > 7 && v.get(..7).is_some_and(|p| p.eq_ignore_ascii_case("bearer ")))
        {
            headers.insert("authorization", bearer);
            return Some(headers);
        }

        let jar = self
            .cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ");

        if !jar.is_empty() {
            headers.insert("cookie", jar);
        } else if let Some(cookie) = header("cookie") {
            headers.insert("cookie", cookie);
        } else {
            return None;
        }

        Some(headers)
    }
}

/// Headers from the newest auth-info log in a directory.
///
/// Files are matched by name prefix and `.json` extension; the
/// lexicographically last name is the newest. The lookup result is memoised
/// for `cache_ttl`.
pub struct AuthLogProvider {
    dir: PathBuf,
    prefix: String,
    cache_ttl: Duration,
    cached: Mutex<Option<(Instant, Option<AuthHeaders>)>>,
}

impl AuthLogProvider {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            cache_ttl,
            cached: Mutex::new(None),
        }
    }

    async fn latest_log(&self) -> Result<Option<PathBuf>, CredentialError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut newest: Option<String> = None;
        while let Some(entry) = entries.next_entry().await? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !name.starts_with(&self.prefix) || !name.ends_with(".json") {
                continue;
            }
            if newest.as_ref().map_or(true, |current| name > *current) {
                newest = Some(name);
            }
        }

        Ok(newest.map(|name| self.dir.join(name)))
    }

    async fn read_log(path: &Path) -> Result<AuthLogRecord, CredentialError> {
        let contents = tokio::fs::read_to_string(path).await?;
        serde_json::from_str(&contents).map_err(|source| CredentialError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[async_trait]
impl CredentialProvider for AuthLogProvider {
    fn name(&self) -> &str {
        "auth_log"
    }

    async fn headers(&self) -> Result<Option<AuthHeaders>, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some((fetched_at, headers)) = cached.as_ref() {
            if fetched_at.elapsed() < self.cache_ttl {
                return Ok(headers.clone());
            }
        }

        let headers = match self.latest_log().await? {
            Some(path) => {
                debug!(path = %path.display(), "Reading auth log");
                Self::read_log(&path).await?.to_headers()
            }
            None => None,
        };

        *cached = Some((Instant::now(), headers.clone()));
        Ok(headers)
    }
}

/// Priority-ordered list of credential providers.
#[derive(Clone, Default)]
pub struct CredentialChain {
    providers: Vec<Arc<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new(providers: Vec<Arc<dyn CredentialProvider>>) -> Self {
        Self { providers }
    }

    /// Build the chain named by `auth.provider_order`. Unknown names are
    /// logged and skipped.
    pub fn from_config(
        auth: &AuthConfig,
        store: Arc<TokenStore>,
        defaults: CookieDefaults,
    ) -> Self {
        let mut providers: Vec<Arc<dyn CredentialProvider>> = Vec::new();

        for name in &auth.provider_order {
            match name.as_str() {
                "stored_token" => providers.push(Arc::new(StoredTokenProvider::new(
                    Arc::clone(&store),
                    defaults.clone(),
                ))),
                "auth_log" => providers.push(Arc::new(AuthLogProvider::new(
                    auth.log_dir.clone(),
                    auth.log_prefix.clone(),
                    Duration::from_secs(auth.log_cache_seconds),
                ))),
                other => warn!(provider = %other, "Unknown credential provider, skipping"),
            }
        }

        Self::new(providers)
    }

    pub fn provider_names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Headers from the first provider that has any.
    ///
    /// Provider errors are logged and treated as "nothing available". When
    /// no provider yields, the result is empty.
    pub async fn auth_headers(&self) -> AuthHeaders {
        for provider in &self.providers {
            match provider.headers().await {
                Ok(Some(headers)) if !headers.is_empty() => {
                    debug!(provider = provider.name(), "Using upstream credentials");
                    return headers;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "Credential provider failed");
                }
            }
        }

        debug!("No upstream credentials available");
        AuthHeaders::new()
    }
}
