use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{parse_token_response, urlencoding, OAuthProvider, TokenSet};
use crate::error::AuthError;
use crate::platform::Platform;

const TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
const REVOKE_URL: &str = "https://www.linkedin.com/oauth/v2/revoke";

/// LinkedIn OAuth 2.0 provider.
///
/// Quirks:
/// - Access tokens expire in 60 days.
/// - Refresh tokens available with partner approval only; accounts without
///   one are never proactively refreshed.
/// - Token response carries no `token_type`.
pub struct LinkedInProvider {
    client_id: String,
    client_secret: String,
    token_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct LinkedInTokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
    refresh_token_expires_in: Option<u64>,
    scope: Option<String>,
}

impl From<LinkedInTokenResponse> for TokenSet {
    fn from(r: LinkedInTokenResponse) -> Self {
        TokenSet {
            access_token: r.access_token,
            refresh_token: r.refresh_token,
            token_type: "Bearer".into(),
            expires_in: r.expires_in,
            scope: r.scope,
        }
    }
}

impl LinkedInProvider {
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
impl OAuthProvider for LinkedInProvider {
    fn platform(&self) -> Platform {
        Platform::LinkedIn
    }

    fn display_name(&self) -> &str {
        "LinkedIn"
    }

    fn default_scopes(&self) -> Vec<String> {
        vec![
            "openid".into(),
            "profile".into(),
            "w_member_social".into(),
        ]
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(" ");
        format!(
            "https://www.linkedin.com/oauth/v2/authorization?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}",
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
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Token exchange request failed: {e}")))?;

        let token_resp: LinkedInTokenResponse =
            parse_token_response(Platform::LinkedIn, resp, AuthError::FlowError).await?;
        Ok(token_resp.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("Refresh request failed: {e}")))?;

        let token_resp: LinkedInTokenResponse =
            parse_token_response(Platform::LinkedIn, resp, AuthError::RefreshFailed).await?;
        Ok(token_resp.into())
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        let resp = self
            .http
            .post(REVOKE_URL)
            .form(&[
                ("token", token),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Revoke request failed: {e}")))?;

        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::FlowError(format!("LinkedIn revoke failed: {body}")));
        }

        Ok(())
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(60 * 24 * 3600)
    }
}
