//! Outbound platform API calls on behalf of a connected account.
//!
//! Every attempt goes through the account's rate limiter and uses the
//! currently stored access token. Failures are classified once and retried
//! under a single attempt budget:
//! - 401: refresh the token out of band, then retry
//! - 429: wait `retry-after` seconds (default 1s), then retry
//! - transport error: wait `attempt × 1s`, then retry
//!
//! Any other non-2xx status is returned immediately.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AuthError;
use crate::platform::Platform;
use crate::ratelimit::RateLimiterRegistry;
use crate::scheduler::RefreshScheduler;
use crate::store::CredentialStore;

/// Request shape for [`PlatformClient::request`].
#[derive(Debug, Clone, Deserialize)]
pub struct RequestOptions {
    #[serde(default = "default_method", deserialize_with = "method_serde::deserialize")]
    pub method: Method,
    #[serde(default)]
    pub query: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

fn default_method() -> Method {
    Method::GET
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            query: Vec::new(),
            body: None,
        }
    }
}

impl RequestOptions {
    pub fn post(body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::default()
        }
    }
}

mod method_serde {
    use reqwest::Method;
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Method, D::Error> {
        let raw = String::deserialize(d)?;
        raw.to_ascii_uppercase()
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

enum Retry {
    AuthExpired { body: String },
    RateLimited { wait: Duration, body: String },
    Transient(String),
}

pub struct PlatformClient {
    http: reqwest::Client,
    store: Arc<dyn CredentialStore>,
    scheduler: Arc<RefreshScheduler>,
    limiters: Arc<RateLimiterRegistry>,
    base_urls: HashMap<Platform, String>,
    max_attempts: u32,
    backoff_unit: Duration,
    default_retry_after: Duration,
}

impl PlatformClient {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        scheduler: Arc<RefreshScheduler>,
        limiters: Arc<RateLimiterRegistry>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            store,
            scheduler,
            limiters,
            base_urls: HashMap::new(),
            max_attempts: 3,
            backoff_unit: Duration::from_secs(1),
            default_retry_after: Duration::from_secs(1),
        }
    }

    /// Point a platform at a different API host.
    pub fn with_base_url(mut self, platform: Platform, url: impl Into<String>) -> Self {
        self.base_urls.insert(platform, url.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Unit of the linear backoff applied after transport errors.
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.backoff_unit = unit;
        self
    }

    fn url_for(&self, platform: Platform, endpoint: &str) -> String {
        let base = self
            .base_urls
            .get(&platform)
            .map(String::as_str)
            .unwrap_or_else(|| platform.api_base_url());
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    /// Call `endpoint` on `platform` as `user_id`, returning the JSON body.
    ///
    /// An empty success body yields `Value::Null`; a non-JSON one is returned as a string.
    pub async fn request(
        &self,
        user_id: &str,
        platform: Platform,
        endpoint: &str,
        options: &RequestOptions,
    ) -> Result<serde_json::Value, AuthError> {
        let limiter = self.limiters.for_account(user_id, platform);
        let url = self.url_for(platform, endpoint);
        let mut attempt = 1;

        loop {
            limiter.check_limit().await;

            let record = self
                .store
                .get_tokens(user_id, platform)
                .await?
                .ok_or_else(|| AuthError::NotFound(format!("{platform} account")))?;

            let mut req = self
                .http
                .request(options.method.clone(), &url)
                .bearer_auth(&record.access_token);
            if !options.query.is_empty() {
                req = req.query(&options.query);
            }
            if let Some(body) = &options.body {
                req = req.json(body);
            }

            let retry = match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return read_body(resp).await;
                    }
                    match status {
                        StatusCode::UNAUTHORIZED => Retry::AuthExpired {
                            body: resp.text().await.unwrap_or_default(),
                        },
                        StatusCode::TOO_MANY_REQUESTS => Retry::RateLimited {
                            wait: retry_after(resp.headers()).unwrap_or(self.default_retry_after),
                            body: resp.text().await.unwrap_or_default(),
                        },
                        _ => {
                            return Err(AuthError::PlatformApi {
                                platform: platform.to_string(),
                                status: status.as_u16(),
                                body: resp.text().await.unwrap_or_default(),
                            })
                        }
                    }
                }
                Err(e) => Retry::Transient(e.to_string()),
            };

            if attempt >= self.max_attempts {
                warn!(%platform, user_id, attempt, "giving up on platform request");
                return Err(exhausted(platform, retry));
            }

            match &retry {
                Retry::AuthExpired { .. } => {
                    debug!(%platform, user_id, attempt, "got 401, refreshing token");
                    self.scheduler
                        .refresh(user_id, platform, Some(&record.access_token))
                        .await?;
                }
                Retry::RateLimited { wait, .. } => {
                    debug!(%platform, user_id, attempt, wait_ms = wait.as_millis() as u64, "got 429, backing off");
                    tokio::time::sleep(*wait).await;
                }
                Retry::Transient(e) => {
                    let wait = self.backoff_unit * attempt;
                    debug!(%platform, user_id, attempt, "request failed ({e}), retrying");
                    tokio::time::sleep(wait).await;
                }
            }

            attempt += 1;
        }
    }
}

fn exhausted(platform: Platform, retry: Retry) -> AuthError {
    match retry {
        Retry::AuthExpired { body } => AuthError::PlatformApi {
            platform: platform.to_string(),
            status: StatusCode::UNAUTHORIZED.as_u16(),
            body,
        },
        Retry::RateLimited { body, .. } => AuthError::PlatformApi {
            platform: platform.to_string(),
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            body,
        },
        Retry::Transient(e) => AuthError::Http(e),
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

async fn read_body(resp: reqwest::Response) -> Result<serde_json::Value, AuthError> {
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text)))
}
