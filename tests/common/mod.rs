#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use social_auth::config::RefreshSettings;
use social_auth::providers::{OAuthProvider, ProviderRegistry, TokenSet};
use social_auth::scheduler::RefreshScheduler;
use social_auth::store::MemoryStore;
use social_auth::{AuthError, Platform, TokenRecord};

/// Provider double that hands out numbered access tokens.
pub struct StubProvider {
    pub platform: Platform,
    pub expires_in: u64,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
    /// When set, `refresh_token` signals `entered` and parks until `release`.
    pub gated: AtomicBool,
    pub entered: Notify,
    pub release: Notify,
}

impl StubProvider {
    pub fn new(platform: Platform, expires_in: u64) -> Arc<Self> {
        Arc::new(Self {
            platform,
            expires_in,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            entered: Notify::new(),
            release: Notify::new(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for StubProvider {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn display_name(&self) -> &str {
        "Stub"
    }

    fn default_scopes(&self) -> Vec<String> {
        vec![]
    }

    fn auth_url(&self, _scopes: &[String], state: &str, _redirect_uri: &str) -> String {
        format!("https://stub.test/authorize?state={state}")
    }

    async fn exchange_code(&self, _code: &str, _redirect_uri: &str) -> Result<TokenSet, AuthError> {
        Err(AuthError::FlowError("not used".into()))
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<TokenSet, AuthError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(AuthError::RefreshFailed(format!(
                "{} token request failed: 400 Bad Request",
                self.platform
            )));
        }
        Ok(TokenSet {
            access_token: format!("access-{n}"),
            refresh_token: None,
            token_type: "Bearer".into(),
            expires_in: Some(self.expires_in),
            scope: None,
        })
    }
}

pub fn record(platform: Platform, expires_at: Option<DateTime<Utc>>, refresh: Option<&str>) -> TokenRecord {
    TokenRecord {
        platform,
        access_token: "access-0".into(),
        refresh_token: refresh.map(String::from),
        expires_at,
    }
}

pub fn expiring_in(platform: Platform, minutes: i64) -> TokenRecord {
    record(platform, Some(Utc::now() + Duration::minutes(minutes)), Some("refresh-0"))
}

pub fn settings() -> RefreshSettings {
    RefreshSettings {
        buffer: std::time::Duration::from_secs(300),
        sweep_interval: std::time::Duration::from_secs(60),
        max_failures: 3,
    }
}

pub fn scheduler_with(
    providers: Vec<Arc<dyn OAuthProvider>>,
) -> (Arc<MemoryStore>, Arc<RefreshScheduler>) {
    let store = Arc::new(MemoryStore::new());
    let mut registry = ProviderRegistry::new();
    for p in providers {
        registry.register(p);
    }
    let scheduler = Arc::new(RefreshScheduler::new(
        store.clone(),
        Arc::new(registry),
        settings(),
    ));
    (store, scheduler)
}

/// `a` and `b` are within a few seconds of each other.
pub fn close_to(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).num_seconds().abs() <= 5
}
