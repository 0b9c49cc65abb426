//! Outbound calls to KimVan.
//!
//! The client never follows redirects: the resolver needs the raw `302`
//! `Location`, and the verifier treats a redirect to the sign-in page as a
//! rejected credential. No retries; a failed call is reported once.

mod resolver;
mod verifier;

pub use resolver::UpstreamResolver;
pub use verifier::TokenVerifier;

use crate::config::UpstreamConfig;
use crate::credentials::AuthHeaders;
use std::time::Duration;
use thiserror::Error;

/// Upstream call failures. None of these are fatal to the caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("upstream responded with status {0}")]
    UnexpectedStatus(u16),
    #[error("upstream redirect carried no Location header")]
    MissingLocation,
    #[error("no credentials to present upstream")]
    NoCredentials,
    #[error("upstream request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ResolveError {
    fn from(e: reqwest::Error) -> Self {
        ResolveError::Transport(e.to_string())
    }
}

/// Build the shared HTTP client for upstream calls.
pub fn build_client(config: &UpstreamConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
        .user_agent(config.user_agent.clone())
        .build()
}

/// Attach browser-like defaults plus `auth` to a request.
fn with_headers(
    request: reqwest::RequestBuilder,
    base_url: &str,
    auth: &AuthHeaders,
) -> reqwest::RequestBuilder {
    let mut request = request
        .header("accept", "text/html,application/xhtml+xml,application/json;q=0.9,*/*;q=0.8")
        .header("accept-language", "vi-VN,vi;q=0.9,en;q=0.8")
        .header("referer", format!("{}/", base_url));

    for (name, value) in auth.iter() {
        request = request.header(name, value);
    }
    request
}
