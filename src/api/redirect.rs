//! Spreadsheet redirect endpoint.
//!
//! `GET /api/spreadsheets/:id/:type/:course/redirect` answers `302` with the
//! destination URL, from the cache when fresh, otherwise by replaying the
//! KimVan redirect with stored credentials.

use crate::cache::{CacheKey, RedirectCache};
use crate::credentials::CredentialChain;
use crate::upstream::UpstreamResolver;
use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const CACHE_CONTROL_VALUE: &str = "public, max-age=0, must-revalidate";
const MSG_NOT_FOUND: &str = "Không tìm thấy URL đích";
const MSG_NOT_FOUND_DETAIL: &str = "Không thể lấy liên kết từ KimVan, vui lòng thử lại sau";
const MSG_SERVER_ERROR: &str = "Lỗi máy chủ";
const MSG_SERVER_ERROR_DETAIL: &str = "Đã xảy ra lỗi khi xử lý yêu cầu";

/// Shared application state for the redirect route
pub struct RedirectAppState {
    pub cache: Arc<RedirectCache>,
    pub resolver: Arc<UpstreamResolver>,
    pub credentials: Arc<CredentialChain>,
    /// One lock per key currently being resolved
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RedirectAppState {
    pub fn new(
        cache: Arc<RedirectCache>,
        resolver: Arc<UpstreamResolver>,
        credentials: Arc<CredentialChain>,
    ) -> Self {
        Self {
            cache,
            resolver,
            credentials,
            locks: DashMap::new(),
        }
    }

    /// Keys with a resolution in flight.
    pub fn pending_resolutions(&self) -> usize {
        self.locks.len()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error types for the redirect route
#[derive(Debug, PartialEq)]
pub enum RedirectError {
    /// Upstream gave no destination
    NotFound,
    /// Anything else; details are logged, not returned
    Internal,
}

impl IntoResponse for RedirectError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            RedirectError::NotFound => {
                (StatusCode::NOT_FOUND, MSG_NOT_FOUND, MSG_NOT_FOUND_DETAIL)
            }
            RedirectError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                MSG_SERVER_ERROR,
                MSG_SERVER_ERROR_DETAIL,
            ),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });

        (status, body).into_response()
    }
}

/// Create redirect router
pub fn create_redirect_router(state: RedirectAppState) -> Router {
    Router::new()
        .route(
            "/api/spreadsheets/:id/:type/:course/redirect",
            get(redirect_spreadsheet),
        )
        .with_state(Arc::new(state))
}

/// GET /api/spreadsheets/:id/:type/:course/redirect
async fn redirect_spreadsheet(
    State(state): State<Arc<RedirectAppState>>,
    Path((id, kind, course)): Path<(String, String, String)>,
) -> Result<Response, RedirectError> {
    let key = CacheKey::new(&id, &kind, &course);

    if let Some(url) = fresh_cached(&state.cache, &key).await {
        debug!(key = %key, "Redirect served from cache");
        return found(&url);
    }

    let lock = state
        .locks
        .entry(key.as_str().to_string())
        .or_default()
        .clone();
    // Declared after `lock` so it runs first, also when the request is dropped
    let _cleanup = LockCleanup {
        locks: &state.locks,
        key: key.as_str(),
    };

    let outcome = {
        let _guard = lock.lock().await;
        resolve_and_store(&state, &key, &id, &kind, &course).await
    };

    found(&outcome?)
}

/// Removes a key's lock once the last interested request lets go of it.
struct LockCleanup<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: &'a str,
}

impl Drop for LockCleanup<'_> {
    fn drop(&mut self) {
        // Map entry plus the dropping request's clone: nobody else waits
        self.locks
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Runs with the key's lock held. A request that waited on the lock usually
/// finds the URL its predecessor just stored.
async fn resolve_and_store(
    state: &RedirectAppState,
    key: &CacheKey,
    id: &str,
    kind: &str,
    course: &str,
) -> Result<String, RedirectError> {
    if let Some(url) = fresh_cached(&state.cache, key).await {
        debug!(key = %key, "Redirect resolved by concurrent request");
        return Ok(url);
    }

    let auth = state.credentials.auth_headers().await;
    let url = state
        .resolver
        .resolve(id, kind, course, &auth)
        .await
        .map_err(|e| {
            info!(key = %key, error = %e, "Redirect could not be resolved");
            RedirectError::NotFound
        })?;

    if !key.is_storable() {
        info!(key = %key, "Redirect resolved, key not cacheable");
        return Ok(url);
    }

    match state.cache.put(key, &url).await {
        Ok(()) => info!(key = %key, "Redirect resolved and cached"),
        Err(e) => warn!(key = %key, error = %e, "Failed to cache resolved redirect"),
    }

    Ok(url)
}

/// Cached URL for `key` if present and fresh. Read failures count as a miss.
async fn fresh_cached(cache: &RedirectCache, key: &CacheKey) -> Option<String> {
    match cache.get(key).await {
        Ok(Some(entry)) if !entry.stale => Some(entry.url),
        Ok(Some(entry)) => {
            debug!(key = %key, age_days = entry.age_days, "Cached redirect is stale");
            None
        }
        Ok(None) => None,
        Err(e) => {
            warn!(path = %cache.path().display(), error = %e, "Redirect cache unreadable");
            None
        }
    }
}

fn found(url: &str) -> Result<Response, RedirectError> {
    let location = HeaderValue::from_str(url).map_err(|e| {
        error!(error = %e, "Destination URL is not a valid header value");
        RedirectError::Internal
    })?;

    Ok((
        StatusCode::FOUND,
        [
            (header::LOCATION, location),
            (header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE)),
        ],
    )
        .into_response())
}
