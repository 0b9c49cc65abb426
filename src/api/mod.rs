// HTTP API: token management and spreadsheet redirects

pub mod redirect;
pub mod token;

pub use redirect::{create_redirect_router, RedirectAppState, RedirectError};
pub use token::{create_token_router, TokenAppState, TokenApiError};

use crate::config::ServerConfig;
use axum::{http::HeaderValue, response::Json, routing::get, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Assemble the full application router.
pub fn create_router(
    token_state: TokenAppState,
    redirect_state: RedirectAppState,
    server: &ServerConfig,
) -> Router {
    let router = Router::new()
        .route("/health", get(health))
        .merge(create_token_router(token_state))
        .merge(create_redirect_router(redirect_state));

    match cors_layer(&server.cors_allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// No layer when no origins are configured; `"*"` allows any origin.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::from(Any)
    } else {
        let values: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        AllowOrigin::list(values)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(Any)
            .allow_headers(Any),
    )
}
