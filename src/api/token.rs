//! KimVan token management endpoints.
//!
//! - `POST /api/kimvan-token` normalises and stores a captured credential
//! - `GET /api/kimvan-token` reports what is stored (optionally verified)
//! - `DELETE /api/kimvan-token` removes it

use crate::config::TokenConfig;
use crate::credentials::{StoreError, StoredToken, TokenStore, TokenType};
use crate::token::{
    build_full_cookie_string, decode_jwt_expiry, detect_token_type, parse_cookie_string,
    CodecError, DetectedType,
};
use crate::upstream::TokenVerifier;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};


const MSG_SAVED: &str = "Đã lưu token KimVan thành công";
const MSG_DELETED: &str = "Đã xóa token KimVan";
const MSG_NOTHING_TO_DELETE: &str = "Không có token KimVan nào để xóa";
const MSG_INVALID_TOKEN: &str = "Token hoặc cookie không hợp lệ";
const MSG_MISSING_TOKEN: &str = "Vui lòng cung cấp cookie hoặc access token";
const MSG_SERVER_ERROR: &str = "Lỗi máy chủ, vui lòng thử lại sau";

/// Shared application state for token API
#[derive(Clone)]
pub struct TokenAppState {
    pub store: Arc<TokenStore>,
    pub verifier: Option<Arc<TokenVerifier>>,
    pub config: TokenConfig,
}

/// Request body for POST /api/kimvan-token
#[derive(Debug, Default, Deserialize)]
pub struct TokenSubmission {
    pub cookie: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    #[serde(rename = "refreshToken")]
    pub refresh_token: Option<String>,
    pub auth_email: Option<String>,
    /// Epoch milliseconds
    #[serde(rename = "tokenExpiryTime")]
    pub token_expiry_time: Option<f64>,
}

/// Response for POST /api/kimvan-token
#[derive(Debug, Serialize)]
pub struct SaveTokenResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "expiryDate")]
    pub expiry_date: Option<String>,
    #[serde(rename = "tokenType")]
    pub token_type: TokenType,
    #[serde(rename = "hasCookieComponents")]
    pub has_cookie_components: bool,
    #[serde(rename = "hasAuthInfo")]
    pub has_auth_info: bool,
}

/// Details of a stored token for GET /api/kimvan-token
#[derive(Debug, Serialize)]
pub struct TokenStatus {
    pub exists: bool,
    pub valid: bool,
    #[serde(rename = "expiryDate")]
    pub expiry_date: Option<String>,
    #[serde(rename = "timeRemaining")]
    pub time_remaining: String,
    #[serde(rename = "tokenType")]
    pub token_type: TokenType,
    #[serde(rename = "hasCookieComponents")]
    pub has_cookie_components: bool,
    #[serde(rename = "hasAuthInfo")]
    pub has_auth_info: bool,
    pub auth_email: Option<String>,
    #[serde(rename = "tokenExpiryTime")]
    pub token_expiry_time: Option<i64>,
    #[serde(rename = "refreshTokenExists")]
    pub refresh_token_exists: bool,
    /// Present only when verification was requested; null when inconclusive
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<Option<bool>>,
}

/// Response for GET /api/kimvan-token
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TokenStatusResponse {
    Missing { exists: bool },
    Present(TokenStatus),
}

/// Response for DELETE /api/kimvan-token
#[derive(Debug, Serialize)]
pub struct DeleteTokenResponse {
    pub success: bool,
    pub message: String,
}

/// Query parameters for GET /api/kimvan-token
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub verify: bool,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    message: String,
}

/// Application error types for token endpoints
#[derive(Debug, PartialEq)]
pub enum TokenApiError {
    /// Token missing or unrecognised
    BadRequest(String),
    /// Storage failure; details are logged, not returned
    ServerError,
}

impl IntoResponse for TokenApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            TokenApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_token", msg)
            }
            TokenApiError::ServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                MSG_SERVER_ERROR.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<CodecError> for TokenApiError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::Empty => TokenApiError::BadRequest(MSG_MISSING_TOKEN.to_string()),
            CodecError::MissingSessionToken => {
                TokenApiError::BadRequest(MSG_INVALID_TOKEN.to_string())
            }
        }
    }
}

/// Create token API router
pub fn create_token_router(state: TokenAppState) -> Router {
    Router::new()
        .route(
            "/api/kimvan-token",
            get(get_token).post(save_token).delete(delete_token),
        )
        .with_state(Arc::new(state))
}

/// Turn a client submission into the token to persist.
///
/// Cookie input wins over `accessToken`. Expiry comes from
/// `tokenExpiryTime`, then the JWT `exp` claim, then the configured default.
pub fn build_stored_token(
    submission: &TokenSubmission,
    config: &TokenConfig,
    now_ms: i64,
) -> Result<StoredToken, TokenApiError> {
    let cookie = submission
        .cookie
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty());
    let access_token = submission
        .access_token
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());

    let mut token = if let Some(cookie) = cookie {
        let parsed = parse_cookie_string(cookie)?;
        let session = parsed
            .session_token
            .clone()
            .ok_or(CodecError::MissingSessionToken)?;

        let token_type = match parsed.kind {
            DetectedType::FullCookie if parsed.cookie_string.is_some() => TokenType::Cookies,
            DetectedType::FullCookie | DetectedType::Session => TokenType::Session,
            DetectedType::Jwt => TokenType::Jwt,
            DetectedType::Unknown => {
                return Err(TokenApiError::BadRequest(MSG_INVALID_TOKEN.to_string()))
            }
        };

        let mut token = StoredToken::new(
            session.clone(),
            token_type,
            now_ms,
            None,
            config.default_validity_ms(),
        );
        if token_type != TokenType::Jwt {
            token.csrf_token = parsed.csrf_token.clone();
            token.callback_url = parsed.callback_url.clone();
            token.session_token = Some(session);
            token.cookie_string = Some(build_full_cookie_string(&parsed, &config.cookie_defaults()));
        }
        token
    } else if let Some(access_token) = access_token {
        if detect_token_type(access_token) != DetectedType::Jwt {
            return Err(TokenApiError::BadRequest(MSG_INVALID_TOKEN.to_string()));
        }
        StoredToken::new(
            access_token,
            TokenType::Jwt,
            now_ms,
            None,
            config.default_validity_ms(),
        )
    } else {
        return Err(TokenApiError::BadRequest(MSG_MISSING_TOKEN.to_string()));
    };

    let supplied_expiry = submission
        .token_expiry_time
        .filter(|t| t.is_finite())
        .map(|t| t as i64);
    let expiry = supplied_expiry.filter(|t| *t > now_ms).or_else(|| {
        (token.token_type == TokenType::Jwt)
            .then(|| decode_jwt_expiry(&token.value))
            .flatten()
            .map(|exp| exp.timestamp_millis())
            .filter(|t| *t > now_ms)
    });
    if let Some(expiry) = expiry {
        token.expiry_date = expiry;
    }

    token.access_token = access_token.map(str::to_string);
    token.refresh_token = submission.refresh_token.clone().filter(|t| !t.is_empty());
    token.auth_email = submission.auth_email.clone().filter(|e| !e.is_empty());
    token.token_expiry_time = supplied_expiry;

    Ok(token)
}

/// POST /api/kimvan-token
async fn save_token(
    State(state): State<Arc<TokenAppState>>,
    body: Result<Json<TokenSubmission>, JsonRejection>,
) -> Result<Json<SaveTokenResponse>, TokenApiError> {
    let Json(submission) = body.map_err(|e| {
        warn!(error = %e, "Rejected token submission body");
        TokenApiError::BadRequest(MSG_MISSING_TOKEN.to_string())
    })?;

    let token = build_stored_token(&submission, &state.config, Utc::now().timestamp_millis())
        .map_err(|e| {
            warn!(error = ?e, "Unrecognised token submission");
            e
        })?;

    state.store.save(&token).await.map_err(|e| {
        error!(path = %state.store.path().display(), error = %e, "Failed to save token");
        TokenApiError::ServerError
    })?;

    info!(
        token_type = token.token_type.as_str(),
        expiry_date = token.expiry_date,
        has_cookie_components = token.has_cookie_components(),
        "KimVan token stored"
    );

    Ok(Json(SaveTokenResponse {
        success: true,
        message: MSG_SAVED.to_string(),
        expiry_date: format_expiry(token.expiry_date),
        token_type: token.token_type,
        has_cookie_components: token.has_cookie_components(),
        has_auth_info: token.has_auth_info(),
    }))
}

/// GET /api/kimvan-token
///
/// Unreadable or corrupt stores are logged and reported as absent.
async fn get_token(
    State(state): State<Arc<TokenAppState>>,
    Query(query): Query<StatusQuery>,
) -> Json<TokenStatusResponse> {
    let token = match state.store.load().await {
        Ok(token) => token,
        Err(StoreError::NotFound) => {
            return Json(TokenStatusResponse::Missing { exists: false });
        }
        Err(e) => {
            warn!(path = %state.store.path().display(), error = %e, "Failed to read stored token");
            return Json(TokenStatusResponse::Missing { exists: false });
        }
    };

    let verified = if query.verify {
        Some(match &state.verifier {
            Some(verifier) => match verifier.verify(&token).await {
                Ok(accepted) => Some(accepted),
                Err(e) => {
                    warn!(error = %e, "Token verification inconclusive");
                    None
                }
            },
            None => None,
        })
    } else {
        None
    };

    Json(TokenStatusResponse::Present(token_status(
        &token,
        Utc::now().timestamp_millis(),
        verified,
    )))
}

/// DELETE /api/kimvan-token
async fn delete_token(
    State(state): State<Arc<TokenAppState>>,
) -> Result<Json<DeleteTokenResponse>, TokenApiError> {
    match state.store.delete().await {
        Ok(()) => {
            info!("KimVan token deleted");
            Ok(Json(DeleteTokenResponse {
                success: true,
                message: MSG_DELETED.to_string(),
            }))
        }
        Err(StoreError::NotFound) => Ok(Json(DeleteTokenResponse {
            success: false,
            message: MSG_NOTHING_TO_DELETE.to_string(),
        })),
        Err(e) => {
            error!(path = %state.store.path().display(), error = %e, "Failed to delete token");
            Err(TokenApiError::ServerError)
        }
    }
}

pub fn token_status(token: &StoredToken, now_ms: i64, verified: Option<Option<bool>>) -> TokenStatus {
    let (days, hours) = token.time_remaining_at(now_ms);

    TokenStatus {
        exists: true,
        valid: token.is_valid_at(now_ms),
        expiry_date: format_expiry(token.expiry_date),
        time_remaining: format!("{} ngày {} giờ", days, hours),
        token_type: token.token_type,
        has_cookie_components: token.has_cookie_components(),
        has_auth_info: token.has_auth_info(),
        auth_email: token.auth_email.clone(),
        token_expiry_time: token.token_expiry_time,
        refresh_token_exists: token.refresh_token.is_some(),
        verified,
    }
}

fn format_expiry(expiry_ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(expiry_ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}
