pub mod env;

use crate::token::CookieDefaults;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Complete gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub token: TokenConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Origins allowed to call the API from a browser. Empty disables CORS;
    /// `"*"` allows any origin.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// KimVan upstream configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Identity endpoint used to verify JWT tokens
    #[serde(default = "default_whoami_path")]
    pub whoami_path: String,
    /// Listing endpoint used to verify session/cookie tokens
    #[serde(default = "default_listing_path")]
    pub listing_path: String,
}

fn default_base_url() -> String {
    "https://kimvan.id.vn".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36".to_string()
}

fn default_timeout_seconds() -> u64 {
    15
}

fn default_whoami_path() -> String {
    "/api/auth/session".to_string()
}

fn default_listing_path() -> String {
    "/api/spreadsheets".to_string()
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            timeout_seconds: default_timeout_seconds(),
            whoami_path: default_whoami_path(),
            listing_path: default_listing_path(),
        }
    }
}

/// Token store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    #[serde(default = "default_token_file")]
    pub file: PathBuf,
    /// Validity window for tokens that carry no usable expiry
    #[serde(default = "default_validity_days")]
    pub default_validity_days: i64,
    #[serde(default = "default_fallback_csrf_token")]
    pub fallback_csrf_token: String,
    #[serde(default = "default_fallback_callback_url")]
    pub fallback_callback_url: String,
}

fn default_token_file() -> PathBuf {
    PathBuf::from("kimvan-token.json")
}

fn default_validity_days() -> i64 {
    30
}

fn default_fallback_csrf_token() -> String {
    CookieDefaults::default().csrf_token
}

fn default_fallback_callback_url() -> String {
    CookieDefaults::default().callback_url
}

impl TokenConfig {
    pub fn cookie_defaults(&self) -> CookieDefaults {
        CookieDefaults {
            csrf_token: self.fallback_csrf_token.clone(),
            callback_url: self.fallback_callback_url.clone(),
        }
    }

    pub fn default_validity_ms(&self) -> i64 {
        self.default_validity_days.max(1) * crate::credentials::DAY_MS
    }
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            file: default_token_file(),
            default_validity_days: default_validity_days(),
            fallback_csrf_token: default_fallback_csrf_token(),
            fallback_callback_url: default_fallback_callback_url(),
        }
    }
}

/// Redirect cache configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_file")]
    pub file: PathBuf,
    /// Entries older than this are re-resolved
    #[serde(default = "default_ttl_days")]
    pub ttl_days: f64,
    /// Entries older than this are deleted
    #[serde(default = "default_evict_after_days")]
    pub evict_after_days: f64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_cache_file() -> PathBuf {
    PathBuf::from("kimvan-redirect-cache.json")
}

fn default_ttl_days() -> f64 {
    7.0
}

fn default_evict_after_days() -> f64 {
    30.0
}

fn default_max_entries() -> usize {
    10_000
}

fn default_sweep_interval() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            file: default_cache_file(),
            ttl_days: default_ttl_days(),
            evict_after_days: default_evict_after_days(),
            max_entries: default_max_entries(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

/// Upstream credential sources
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Provider names in priority order: "stored_token", "auth_log"
    #[serde(default = "default_provider_order")]
    pub provider_order: Vec<String>,
    /// Directory holding captured auth-info logs
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default = "default_log_prefix")]
    pub log_prefix: String,
    #[serde(default = "default_log_cache_seconds")]
    pub log_cache_seconds: u64,
}

fn default_provider_order() -> Vec<String> {
    vec!["stored_token".to_string(), "auth_log".to_string()]
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_prefix() -> String {
    "kimvan-auth-".to_string()
}

fn default_log_cache_seconds() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            provider_order: default_provider_order(),
            log_dir: default_log_dir(),
            log_prefix: default_log_prefix(),
            log_cache_seconds: default_log_cache_seconds(),
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<GatewayConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: GatewayConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Load configuration from `path` if it exists, else defaults; then apply
/// environment overrides.
pub fn load_or_default(path: &Path) -> Result<GatewayConfig> {
    let mut config = if path.exists() {
        load_config(path)?
    } else {
        GatewayConfig::default()
    };
    env::apply_overrides(&mut config);
    Ok(config)
}
