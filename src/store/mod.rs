//! Credential store for connected social accounts.
//!
//! The scheduler and API wrapper only see the [`CredentialStore`] trait.
//! Production uses PostgreSQL (`social_accounts`); local dev and tests use
//! the in-memory store.

pub mod db;
pub mod memory;

pub use db::PgCredentialStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AuthError;
use crate::platform::Platform;
use crate::token::TokenRecord;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the tokens for (user, platform) and reset its failure count.
    ///
    /// A `None` refresh token keeps the stored one.
    async fn save_tokens(&self, user_id: &str, record: &TokenRecord) -> Result<(), AuthError>;

    async fn get_tokens(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<TokenRecord>, AuthError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool, AuthError>;

    /// Account metadata for a user (no tokens).
    async fn list(&self, user_id: &str) -> Result<Vec<AccountInfo>, AuthError>;

    /// Persist when the next proactive refresh is due (`None` clears it).
    async fn set_next_refresh(
        &self,
        user_id: &str,
        platform: Platform,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError>;

    /// Bump the consecutive failure counter and return its new value.
    async fn increment_failure(&self, user_id: &str, platform: Platform)
        -> Result<u32, AuthError>;

    /// Accounts with a pending refresh and fewer than `max_failures` failures.
    async fn scheduled(&self, max_failures: u32) -> Result<Vec<ScheduledRefresh>, AuthError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountInfo {
    pub user_id: String,
    pub platform: Platform,
    pub expires_at: Option<DateTime<Utc>>,
    pub next_refresh_at: Option<DateTime<Utc>>,
    pub has_refresh_token: bool,
    pub failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted "next refresh due" entry, used to rebuild the due table on startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRefresh {
    pub user_id: String,
    pub platform: Platform,
    pub due_at: DateTime<Utc>,
    pub failure_count: u32,
}
