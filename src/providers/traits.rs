use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::error::AuthError;
use crate::platform::Platform;
pub use crate::token::TokenSet;

/// Trait that every platform's OAuth integration implements.
///
/// Implementations only speak the platform's token endpoint. Retries and rate
/// limiting belong to the caller.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn platform(&self) -> Platform;

    /// Human-readable display name (e.g., "YouTube").
    fn display_name(&self) -> &str;

    /// Scopes requested when the caller does not ask for specific ones.
    fn default_scopes(&self) -> Vec<String>;

    /// Build the authorization URL that the user should be redirected to.
    ///
    /// - `scopes`: The OAuth scopes to request.
    /// - `state`: An opaque, HMAC-signed state string for CSRF protection.
    /// - `redirect_uri`: The callback URL registered with the platform.
    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String;

    /// Exchange an authorization code for an access token (and optionally refresh token).
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AuthError>;

    /// Exchange a refresh token (or long-lived token, for Graph API platforms) for fresh credentials.
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError>;

    /// Revoke an access or refresh token. Not all platforms support this.
    async fn revoke(&self, _token: &str) -> Result<(), AuthError> {
        Ok(())
    }

    /// Lifetime assumed when a token response omits `expires_in`.
    fn token_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }
}

/// Check status and parse a token endpoint response.
///
/// `err` picks the error variant so exchange and refresh failures stay distinguishable.
pub(crate) async fn parse_token_response<T: DeserializeOwned>(
    platform: Platform,
    resp: reqwest::Response,
    err: fn(String) -> AuthError,
) -> Result<T, AuthError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(err(format!(
            "{platform} token request failed: {} {body}",
            status
        )));
    }

    resp.json::<T>()
        .await
        .map_err(|e| err(format!("Failed to parse {platform} token response: {e}")))
}

pub(crate) fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
