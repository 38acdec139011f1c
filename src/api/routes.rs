//! API route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction. Everything
//! except `/status` and the OAuth callback is service-to-service and
//! requires the `x-internal-secret` header.

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::client::RequestOptions;
use crate::error::AuthError;
use crate::platform::Platform;
use crate::SharedState;

/// OAuth `state` values older than this are rejected.
const STATE_MAX_AGE_SECS: i64 = 600;

// =============================================================================
// V1 Router
// =============================================================================

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        .route("/platforms", get(platforms))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth/start/{platform}", get(oauth_start))
        .route("/oauth/callback/{platform}", get(oauth_callback))
        // ── Accounts ─────────────────────────────────────────────────────
        .route("/accounts", get(accounts_list))
        .route("/accounts/{platform}", delete(account_disconnect))
        .route("/accounts/{platform}/refresh", post(account_refresh))
        .route("/accounts/{platform}/request", post(account_request))
        .route("/accounts/{platform}/rate-limit", get(account_rate_limit))
        .with_state(state)
}

fn require_internal(state: &SharedState, headers: &HeaderMap) -> Result<(), AuthError> {
    let internal = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthError::Unauthorized)?;

    if internal != state.config.auth_service_secret {
        return Err(AuthError::Unauthorized);
    }
    Ok(())
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

// =============================================================================
// Health
// =============================================================================

async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "social-auth",
        "version": env!("CARGO_PKG_VERSION"),
        "pending_refreshes": state.scheduler.pending_count(),
    }))
}

/// GET /v1/platforms: Platforms with client credentials configured.
async fn platforms(State(state): State<SharedState>) -> impl IntoResponse {
    let data: Vec<_> = state
        .registry
        .list()
        .into_iter()
        .filter_map(|p| state.registry.get(p))
        .map(|p| json!({ "id": p.platform(), "name": p.display_name() }))
        .collect();
    Json(json!({ "data": data }))
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

#[derive(Deserialize)]
struct OAuthStartQuery {
    user_id: String,
    #[serde(default)]
    scopes: String,
}

/// GET /v1/oauth/start/:platform: Build the authorization URL for a connect flow.
async fn oauth_start(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(q): Query<OAuthStartQuery>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let platform: Platform = platform.parse()?;
    let provider = state.registry.require(platform)?;

    let signed_state = state.crypto.sign_state(&encode_state(
        &q.user_id,
        platform,
        chrono::Utc::now().timestamp(),
    ))?;

    let scopes: Vec<String> = if q.scopes.is_empty() {
        provider.default_scopes()
    } else {
        q.scopes.split(',').map(|s| s.trim().to_string()).collect()
    };

    let url = provider.auth_url(&scopes, &signed_state, &state.config.callback_url(platform));
    Ok(Json(json!({ "data": { "url": url } })))
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: String,
    state: String,
}

/// GET /v1/oauth/callback/:platform: Exchange the code, store tokens, schedule refresh.
async fn oauth_callback(
    State(state): State<SharedState>,
    Path(platform): Path<String>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Response, AuthError> {
    let platform: Platform = platform.parse()?;

    let payload = state.crypto.verify_state(&q.state)?;
    let (user_id, state_platform, timestamp) = decode_state(&payload)?;
    if state_platform != platform {
        return Err(AuthError::InvalidState);
    }
    if chrono::Utc::now().timestamp() - timestamp > STATE_MAX_AGE_SECS {
        return Err(AuthError::BadRequest("OAuth session expired".into()));
    }

    let provider = state.registry.require(platform)?;
    let tokens = provider
        .exchange_code(&q.code, &state.config.callback_url(platform))
        .await?;
    let record = tokens.into_record(platform, chrono::Utc::now(), provider.token_ttl(), None);

    state.store.save_tokens(&user_id, &record).await?;
    state
        .scheduler
        .schedule_refresh(&user_id, platform, &record)
        .await?;
    info!(%platform, user_id, "account connected");

    let redirect_url = format!(
        "{}/settings/accounts?connected={}",
        state.config.dashboard_url, platform
    );
    Ok(Redirect::temporary(&redirect_url).into_response())
}

fn encode_state(user_id: &str, platform: Platform, timestamp: i64) -> String {
    format!("{user_id}:{platform}:{timestamp}")
}

/// Split from the right so user IDs may contain `:`.
fn decode_state(payload: &str) -> Result<(String, Platform, i64), AuthError> {
    let mut parts = payload.rsplitn(3, ':');
    let timestamp = parts
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or(AuthError::InvalidState)?;
    let platform = parts
        .next()
        .and_then(|p| p.parse().ok())
        .ok_or(AuthError::InvalidState)?;
    let user_id = parts
        .next()
        .filter(|u| !u.is_empty())
        .ok_or(AuthError::InvalidState)?;
    Ok((user_id.to_string(), platform, timestamp))
}

// =============================================================================
// Account Endpoints
// =============================================================================

/// GET /v1/accounts: Connected accounts for a user (no tokens).
async fn accounts_list(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let accounts = state.store.list(&q.user_id).await?;
    Ok(Json(json!({ "data": accounts })))
}

/// DELETE /v1/accounts/:platform: Disconnect: cancel refresh, delete, revoke.
async fn account_disconnect(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let platform: Platform = platform.parse()?;

    let record = state
        .scheduler
        .disconnect(&q.user_id, platform)
        .await?
        .ok_or_else(|| AuthError::NotFound(format!("{platform} account")))?;
    state.limiters.forget(&q.user_id, platform);

    if let Some(provider) = state.registry.get(platform) {
        if let Err(e) = provider.revoke(&record.access_token).await {
            warn!(%platform, user_id = %q.user_id, "revoke failed: {e}");
        }
    }

    info!(%platform, user_id = %q.user_id, "account disconnected");

    Ok(Json(json!({ "data": { "success": true } })))
}

/// POST /v1/accounts/:platform/refresh: Refresh now and re-arm the schedule.
async fn account_refresh(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let platform: Platform = platform.parse()?;

    let record = state.scheduler.refresh(&q.user_id, platform, None).await?;

    Ok(Json(json!({
        "data": {
            "platform": record.platform,
            "expires_at": record.expires_at,
            "next_refresh_at": state.scheduler.due_at(&q.user_id, platform),
        }
    })))
}

#[derive(Deserialize)]
struct ProxyRequestBody {
    endpoint: String,
    #[serde(flatten)]
    options: RequestOptions,
}

/// POST /v1/accounts/:platform/request: Call the platform API as the user.
async fn account_request(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(q): Query<UserQuery>,
    Json(body): Json<ProxyRequestBody>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let platform: Platform = platform.parse()?;

    let data = state
        .client
        .request(&q.user_id, platform, &body.endpoint, &body.options)
        .await?;

    Ok(Json(json!({ "data": data })))
}

/// GET /v1/accounts/:platform/rate-limit: Remaining calls in the current window.
async fn account_rate_limit(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(platform): Path<String>,
    Query(q): Query<UserQuery>,
) -> Result<Json<serde_json::Value>, AuthError> {
    require_internal(&state, &headers)?;
    let platform: Platform = platform.parse()?;
    let limit = state.limiters.limit_for(platform);

    Ok(Json(json!({
        "data": {
            "remaining": state.limiters.remaining(&q.user_id, platform),
            "max_requests": limit.max_requests,
            "window_secs": limit.window.as_secs(),
        }
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_payload_survives_colons_in_user_id() {
        let payload = encode_state("auth0|abc:def", Platform::LinkedIn, 1_700_000_000);
        let (user, platform, ts) = decode_state(&payload).unwrap();
        assert_eq!(user, "auth0|abc:def");
        assert_eq!(platform, Platform::LinkedIn);
        assert_eq!(ts, 1_700_000_000);
    }

    #[test]
    fn malformed_state_is_rejected() {
        assert!(decode_state("youtube:123").is_err());
        assert!(decode_state("u1:myspace:123").is_err());
        assert!(decode_state("u1:youtube:soon").is_err());
    }
}
