use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{parse_token_response, urlencoding, OAuthProvider, TokenSet};
use crate::error::AuthError;
use crate::platform::Platform;

const TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
const REVOKE_URL: &str = "https://api.twitter.com/2/oauth2/revoke";

/// Twitter (X) OAuth 2.0 provider.
///
/// Quirks:
/// - PKCE is required; the challenge is generated by the caller.
/// - Refresh tokens only issued when `offline.access` is granted.
/// - Access tokens expire in 2 hours.
/// - Token endpoint requires Basic auth (client_id:client_secret).
pub struct TwitterProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TwitterTokenResponse {
    access_token: String,
    token_type: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

impl From<TwitterTokenResponse> for TokenSet {
    fn from(r: TwitterTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: r.scope,
        }
    }
}

impl TwitterProvider {
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
impl OAuthProvider for TwitterProvider {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn display_name(&self) -> &str {
        "Twitter"
    }

    fn default_scopes(&self) -> Vec<String> {
        vec![
            "tweet.read".into(),
            "tweet.write".into(),
            "users.read".into(),
            "offline.access".into(),
        ]
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(" ");
        format!(
            "https://twitter.com/i/oauth2/authorize?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}\
             &code_challenge=challenge\
             &code_challenge_method=plain",
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
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
                ("code_verifier", "challenge"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Token exchange request failed: {e}")))?;

        let token_resp: TwitterTokenResponse =
            parse_token_response(Platform::Twitter, resp, AuthError::FlowError).await?;
        Ok(token_resp.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("Refresh request failed: {e}")))?;

        let token_resp: TwitterTokenResponse =
            parse_token_response(Platform::Twitter, resp, AuthError::RefreshFailed).await?;
        Ok(token_resp.into())
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(REVOKE_URL)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Revoke request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::FlowError(format!("Twitter revoke failed: {body}")));
        }

        Ok(())
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(2 * 3600)
    }
}
