use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::traits::{parse_token_response, urlencoding, OAuthProvider, TokenSet};
use crate::error::AuthError;
use crate::platform::Platform;

const TOKEN_URL: &str = "https://graph.facebook.com/v18.0/oauth/access_token";
const DIALOG_URL: &str = "https://www.facebook.com/v18.0/dialog/oauth";

/// Facebook Graph API OAuth, shared by Facebook pages and Instagram business accounts.
///
/// Quirks:
/// - No refresh tokens. A still-valid long-lived token is exchanged for a new
///   one via `grant_type=fb_exchange_token`, so the access token doubles as the
///   refresh credential.
/// - Long-lived tokens last about 60 days.
/// - Instagram business accounts authorize through the same Facebook app.
pub struct GraphProvider {
    platform: Platform,
    app_id: String,
    app_secret: String,
    token_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct GraphTokenResponse {
    access_token: String,
    #[serde(default = "bearer")]
    token_type: String,
    expires_in: Option<u64>,
}

fn bearer() -> String {
    "bearer".into()
}

impl From<GraphTokenResponse> for TokenSet {
    fn from(r: GraphTokenResponse) -> Self {
        TokenSet {
            refresh_token: Some(r.access_token.clone()),
            access_token: r.access_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            scope: None,
        }
    }
}

impl GraphProvider {
    pub fn facebook(app_id: String, app_secret: String) -> Self {
        Self::new(Platform::Facebook, app_id, app_secret)
    }

    pub fn instagram(app_id: String, app_secret: String) -> Self {
        Self::new(Platform::Instagram, app_id, app_secret)
    }

    fn new(platform: Platform, app_id: String, app_secret: String) -> Self {
        Self {
            platform,
            app_id,
            app_secret,
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
impl OAuthProvider for GraphProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn display_name(&self) -> &str {
        match self.platform {
            Platform::Instagram => "Instagram",
            _ => "Facebook",
        }
    }

    fn default_scopes(&self) -> Vec<String> {
        match self.platform {
            Platform::Instagram => vec![
                "instagram_basic".into(),
                "instagram_content_publish".into(),
                "pages_show_list".into(),
            ],
            _ => vec![
                "pages_show_list".into(),
                "pages_manage_posts".into(),
                "pages_read_engagement".into(),
            ],
        }
    }

    fn auth_url(&self, scopes: &[String], state: &str, redirect_uri: &str) -> String {
        let scope_str = scopes.join(",");
        format!(
            "{DIALOG_URL}?\
             client_id={client_id}\
             &redirect_uri={redirect_uri}\
             &response_type=code\
             &scope={scope}\
             &state={state}",
            client_id = urlencoding(&self.app_id),
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
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| AuthError::FlowError(format!("Token exchange request failed: {e}")))?;

        let token_resp: GraphTokenResponse =
            parse_token_response(self.platform, resp, AuthError::FlowError).await?;
        Ok(token_resp.into())
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthError> {
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.app_id.as_str()),
                ("client_secret", self.app_secret.as_str()),
                ("fb_exchange_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| AuthError::RefreshFailed(format!("Refresh request failed: {e}")))?;

        let token_resp: GraphTokenResponse =
            parse_token_response(self.platform, resp, AuthError::RefreshFailed).await?;
        Ok(token_resp.into())
    }

    fn token_ttl(&self) -> Duration {
        Duration::from_secs(60 * 24 * 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_token_doubles_as_refresh_credential() {
        let set: TokenSet = GraphTokenResponse {
            access_token: "EAAB-long".into(),
            token_type: "bearer".into(),
            expires_in: Some(5_183_944),
        }
        .into();
        assert_eq!(set.refresh_token.as_deref(), Some("EAAB-long"));
    }

    #[test]
    fn instagram_shares_facebook_dialog() {
        let p = GraphProvider::instagram("app".into(), "secret".into());
        assert_eq!(p.platform(), Platform::Instagram);
        let url = p.auth_url(&p.default_scopes(), "st", "http://cb");
        assert!(url.starts_with(DIALOG_URL));
        assert!(url.contains("instagram_basic"));
    }
}
