use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{parse_token_response, urlencoding, OAuthProvider, TokenSet};
use crate::error::AuthError;
use crate::platform::Platform;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const REVOKE_URL: &str = "https://oauth2.googleapis.com/revoke";

/// YouTube via Google OAuth 2.0.
///
/// Token lifetime: 1 hour.
/// Refresh: Supported (requires `access_type=offline` and `prompt=consent`).
pub struct YouTubeProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_in: Option<u64>,
    scope: Option<String>,
}

impl From<GoogleTokenResponse> for TokenSet {
    fn from(r: GoogleTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            // Google only returns a new refresh token on the first consent
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: r.scope,
        }
    }
}

impl YouTubeProvider {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: TOKEN_URL.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }
}

#[async_trait]
impl OAuthProvider for YouTubeProvider {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    fn display_name(&self) -> &str {
        "YouTube"
    }

    fn default_scopes(&self) -> Vec<String> {
        vec![
            "https://www.googleapis.com/auth/youtube.upload".into(),
            "https://www.googleapis.com/auth/youtube.readonly".into(),
        ]
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(" ");
        format!(
            "https://accounts.google.com/o/oauth2/v2/auth?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}\
             &access_type=offline\
             &prompt=consent",
            client_id = urlencoding(&self.client_id),
            redirect_uri = urlencoding(redirect_uri),
            scope = urlencoding(&scope_str),
            state = urlencoding(state),
        )
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("code", code),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Token exchange request failed: {e}")))?;

        let token_resp: GoogleTokenResponse =
            parse_token_response(Platform::YouTube, resp, AuthError::FlowError).await?;
        Ok(token_resp.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("refresh_token", refresh_token),
                ("client_id", &self.client_id),
                ("client_secret", &self.client_secret),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("Refresh request failed: {e}")))?;

        let token_resp: GoogleTokenResponse =
            parse_token_response(Platform::YouTube, resp, AuthError::RefreshFailed).await?;
        Ok(token_resp.into())
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(REVOKE_URL)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Revoke request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::FlowError(format!("YouTube revoke failed: {body}")));
        }

        Ok(())
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(3600)
    }
}
