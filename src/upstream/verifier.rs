//! Check whether KimVan still accepts the stored token.

use super::{with_headers, ResolveError};
use crate::credentials::{headers_for_token, StoredToken, TokenType};
use crate::token::CookieDefaults;
use reqwest::{Client, StatusCode};
use tracing::debug;

pub struct TokenVerifier {
    client: Client,
    base_url: String,
    whoami_path: String,
    listing_path: String,
    defaults: CookieDefaults,
}

impl TokenVerifier {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        whoami_path: impl Into<String>,
        listing_path: impl Into<String>,
        defaults: CookieDefaults,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            whoami_path: whoami_path.into(),
            listing_path: listing_path.into(),
            defaults,
        }
    }

    /// Ask KimVan whether `token` is accepted.
    ///
    /// JWTs are checked against the identity endpoint, session and cookie
    /// tokens against the listing endpoint.
    ///
    /// # Returns
    /// * `Ok(true)` - 2xx
    /// * `Ok(false)` - 401, 403, or a redirect (to sign-in)
    /// * `Err` - Any other status, transport failure, or unusable token
    pub async fn verify(&self, token: &StoredToken) -> Result<bool, ResolveError> {
        let auth = headers_for_token(token, &self.defaults).ok_or(ResolveError::NoCredentials)?;

        let path = match token.token_type {
            TokenType::Jwt => &self.whoami_path,
            _ => &self.listing_path,
        };
        let url = format!("{}{}", self.base_url, path);

        let response = with_headers(self.client.get(&url), &self.base_url, &auth)
            .send()
            .await?;
        let status = response.status();

        debug!(url = %url, status = status.as_u16(), "Token verification response");

        if status.is_success() {
            Ok(true)
        } else if status == StatusCode::UNAUTHORIZED
            || status == StatusCode::FORBIDDEN
            || status.is_redirection()
        {
            Ok(false)
        } else {
            Err(ResolveError::UnexpectedStatus(status.as_u16()))
        }
    }
}
