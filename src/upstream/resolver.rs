//! Resolve a spreadsheet link to its destination by replaying KimVan's
//! redirect endpoint.

use super::{with_headers, ResolveError};
use crate::credentials::AuthHeaders;
use reqwest::{header::LOCATION, Client, StatusCode};
use tracing::{debug, warn};

pub struct UpstreamResolver {
    client: Client,
    base_url: String,
}

impl UpstreamResolver {
    pub fn new(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upstream redirect endpoint for a content key, segments percent-encoded.
    pub fn redirect_url(&self, id: &str, kind: &str, course: &str) -> String {
        format!(
            "{}/api/spreadsheets/{}/{}/{}/redirect",
            self.base_url,
            urlencoding::encode(id),
            urlencoding::encode(kind),
            urlencoding::encode(course)
        )
    }

    /// GET the redirect endpoint without following it.
    ///
    /// # Returns
    /// * `Ok(url)` - Upstream answered `302` with a `Location`
    /// * `Err(ResolveError)` - Any other status, or a transport failure
    pub async fn resolve(
        &self,
        id: &str,
        kind: &str,
        course: &str,
        auth: &AuthHeaders,
    ) -> Result<String, ResolveError> {
        let url = self.redirect_url(id, kind, course);
        debug!(url = %url, has_auth = !auth.is_empty(), "Resolving upstream redirect");

        let response = with_headers(self.client.get(&url), &self.base_url, auth)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %url, error = %e, "Upstream request failed");
                ResolveError::from(e)
            })?;

        let status = response.status();
        if status != StatusCode::FOUND {
            debug!(url = %url, status = status.as_u16(), "Upstream did not redirect");
            return Err(ResolveError::UnexpectedStatus(status.as_u16()));
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .ok_or(ResolveError::MissingLocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpstreamConfig;
    use crate::upstream::build_client;

    fn resolver_for(base_url: &str) -> UpstreamResolver {
        UpstreamResolver::new(build_client(&UpstreamConfig::default()).unwrap(), base_url)
    }

    #[test]
    fn test_redirect_url_encodes_segments() {
        let resolver = resolver_for("https://kimvan.id.vn/");
        assert_eq!(
            resolver.redirect_url("ID1", "Tài liệu", "a/b"),
            "https://kimvan.id.vn/api/spreadsheets/ID1/T%C3%A0i%20li%E1%BB%87u/a%2Fb/redirect"
        );
    }

    #[tokio::test]
    async fn test_resolve_captures_location_and_sends_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/spreadsheets/ID1/TYPEA/COURSEX/redirect")
            .match_header("authorization", "Bearer tok")
            .with_status(302)
            .with_header("location", "https://dest")
            .create_async()
            .await;

        let mut auth = AuthHeaders::new();
        auth.insert("authorization", "Bearer tok");

        let url = resolver_for(&server.url())
            .resolve("ID1", "TYPEA", "COURSEX", &auth)
            .await
            .unwrap();

        assert_eq!(url, "https://dest");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_resolve_non_redirect_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/spreadsheets/ID1/TYPEA/COURSEX/redirect")
            .with_status(200)
            .with_body("<html></html>")
            .create_async()
            .await;

        let result = resolver_for(&server.url())
            .resolve("ID1", "TYPEA", "COURSEX", &AuthHeaders::new())
            .await;
        assert_eq!(result, Err(ResolveError::UnexpectedStatus(200)));
    }

    #[tokio::test]
    async fn test_resolve_other_redirects_are_not_accepted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/spreadsheets/ID1/TYPEA/COURSEX/redirect")
            .with_status(301)
            .with_header("location", "https://elsewhere")
            .create_async()
            .await;

        let result = resolver_for(&server.url())
            .resolve("ID1", "TYPEA", "COURSEX", &AuthHeaders::new())
            .await;
        assert_eq!(result, Err(ResolveError::UnexpectedStatus(301)));
    }

    #[tokio::test]
    async fn test_resolve_302_without_location() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/spreadsheets/ID1/TYPEA/COURSEX/redirect")
            .with_status(302)
            .create_async()
            .await;

        let result = resolver_for(&server.url())
            .resolve("ID1", "TYPEA", "COURSEX", &AuthHeaders::new())
            .await;
        assert_eq!(result, Err(ResolveError::MissingLocation));
    }

    #[tokio::test]
    async fn test_resolve_transport_failure() {
        // Nothing listens on port 9 locally
        let result = resolver_for("http://127.0.0.1:9")
            .resolve("ID1", "TYPEA", "COURSEX", &AuthHeaders::new())
            .await;
        assert!(matches!(result, Err(ResolveError::Transport(_))));
    }
}
