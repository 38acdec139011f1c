use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the social-auth service.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    // ── Auth Errors ─────────────────────────────────────────────────────
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid state parameter")]
    InvalidState,

    // ── Resource Errors ─────────────────────────────────────────────────
    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown platform: {0}")]
    UnknownPlatform(String),

    #[error("Platform {0} is not configured")]
    PlatformNotConfigured(String),

    // ── Crypto Errors ───────────────────────────────────────────────────
    #[error("Crypto error: {0}")]
    CryptoError(String),

    // ── Platform Errors ─────────────────────────────────────────────────
    #[error("OAuth flow error: {0}")]
    FlowError(String),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// Non-2xx answer from a platform API call that the retry policy gave up on.
    #[error("{platform} API returned {status}: {body}")]
    PlatformApi {
        platform: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(String),

    // ── Internal ────────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AuthError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!("Database error: {e}");
        AuthError::Database(e.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Http(e.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(e: anyhow::Error) -> Self {
        AuthError::Internal(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AuthError::InvalidState => (StatusCode::BAD_REQUEST, "invalid_state"),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AuthError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AuthError::UnknownPlatform(_) => (StatusCode::NOT_FOUND, "unknown_platform"),
            AuthError::PlatformNotConfigured(_) => {
                (StatusCode::NOT_FOUND, "platform_not_configured")
            }
            AuthError::CryptoError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "crypto_error"),
            AuthError::FlowError(_) => (StatusCode::BAD_GATEWAY, "flow_error"),
            AuthError::RefreshFailed(_) => (StatusCode::BAD_GATEWAY, "refresh_failed"),
            AuthError::PlatformApi { status: 429, .. } => {
                (StatusCode::TOO_MANY_REQUESTS, "platform_rate_limited")
            }
            AuthError::PlatformApi { .. } => (StatusCode::BAD_GATEWAY, "platform_api_error"),
            AuthError::Http(_) => (StatusCode::BAD_GATEWAY, "http_error"),
            AuthError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        let body = json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_api_error_maps_to_bad_gateway() {
        let err = AuthError::PlatformApi {
            platform: "twitter".into(),
            status: 403,
            body: "forbidden".into(),
        };
        assert_eq!(err.to_string(), "twitter API returned 403: forbidden");
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn platform_rate_limit_is_passed_through() {
        let err = AuthError::PlatformApi {
            platform: "linkedin".into(),
            status: 429,
            body: String::new(),
        };
        assert_eq!(err.into_response().status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let resp = AuthError::Unauthorized.into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
