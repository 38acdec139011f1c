//! In-process credential store for local development (`DATABASE_URL=memory://`) and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use super::{AccountInfo, CredentialStore, ScheduledRefresh};
use crate::error::AuthError;
use crate::platform::Platform;
use crate::token::TokenRecord;

#[derive(Debug, Clone)]
struct Row {
    record: TokenRecord,
    next_refresh_at: Option<DateTime<Utc>>,
    failure_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<(String, Platform), Row>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted next-refresh time, if any.
    pub fn next_refresh_at(&self, user_id: &str, platform: Platform) -> Option<DateTime<Utc>> {
        self.rows
            .lock()
            .get(&(user_id.to_string(), platform))
            .and_then(|r| r.next_refresh_at)
    }

    pub fn failure_count(&self, user_id: &str, platform: Platform) -> u32 {
        self.rows
            .lock()
            .get(&(user_id.to_string(), platform))
            .map(|r| r.failure_count)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn save_tokens(&self, user_id: &str, record: &TokenRecord) -> Result<(), AuthError> {
        let now = Utc::now();
        let mut rows = self.rows.lock();
        let key = (user_id.to_string(), record.platform);

        match rows.get_mut(&key) {
            Some(row) => {
                let refresh_token = record
                    .refresh_token
                    .clone()
                    .or_else(|| row.record.refresh_token.take());
                row.record = TokenRecord {
                    refresh_token,
                    ..record.clone()
                };
                row.failure_count = 0;
                row.updated_at = now;
            }
            None => {
                rows.insert(
                    key,
                    Row {
                        record: record.clone(),
                        next_refresh_at: None,
                        failure_count: 0,
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn get_tokens(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<TokenRecord>, AuthError> {
        Ok(self
            .rows
            .lock()
            .get(&(user_id.to_string(), platform))
            .map(|r| r.record.clone()))
    }

    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool, AuthError> {
        Ok(self
            .rows
            .lock()
            .remove(&(user_id.to_string(), platform))
            .is_some())
    }

    async fn list(&self, user_id: &str) -> Result<Vec<AccountInfo>, AuthError> {
        let rows = self.rows.lock();
        let mut accounts: Vec<AccountInfo> = rows
            .iter()
            .filter(|((uid, _), _)| uid == user_id)
            .map(|((uid, platform), row)| AccountInfo {
                user_id: uid.clone(),
                platform: *platform,
                expires_at: row.record.expires_at,
                next_refresh_at: row.next_refresh_at,
                has_refresh_token: row.record.refresh_token.is_some(),
                failure_count: row.failure_count,
                created_at: row.created_at,
                updated_at: row.updated_at,
            })
            .collect();
        accounts.sort_by_key(|a| a.platform.as_str());
        Ok(accounts)
    }

    async fn set_next_refresh(
        &self,
        user_id: &str,
        platform: Platform,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        if let Some(row) = self.rows.lock().get_mut(&(user_id.to_string(), platform)) {
            row.next_refresh_at = at;
        }
        Ok(())
    }

    async fn increment_failure(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<u32, AuthError> {
        let mut rows = self.rows.lock();
        match rows.get_mut(&(user_id.to_string(), platform)) {
            Some(row) => {
                row.failure_count += 1;
                row.updated_at = Utc::now();
                Ok(row.failure_count)
            }
            None => Ok(0),
        }
    }

    async fn scheduled(&self, max_failures: u32) -> Result<Vec<ScheduledRefresh>, AuthError> {
        let rows = self.rows.lock();
        let mut due: Vec<ScheduledRefresh> = rows
            .iter()
            .filter(|(_, row)| row.record.refresh_token.is_some() && row.failure_count < max_failures)
            .filter_map(|((uid, platform), row)| {
                row.next_refresh_at.map(|due_at| ScheduledRefresh {
                    user_id: uid.clone(),
                    platform: *platform,
                    due_at,
                    failure_count: row.failure_count,
                })
            })
            .collect();
        due.sort_by_key(|s| s.due_at);
        Ok(due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn record(refresh: Option<&str>) -> TokenRecord {
        TokenRecord {
            platform: Platform::LinkedIn,
            access_token: "access".into(),
            refresh_token: refresh.map(String::from),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[tokio::test]
    async fn save_keeps_existing_refresh_token_when_absent() {
        let store = MemoryStore::new();
        store.save_tokens("u1", &record(Some("r1"))).await.unwrap();
        store.save_tokens("u1", &record(None)).await.unwrap();

        let got = store.get_tokens("u1", Platform::LinkedIn).await.unwrap().unwrap();
        assert_eq!(got.refresh_token.as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn save_resets_failure_count() {
        let store = MemoryStore::new();
        store.save_tokens("u1", &record(Some("r1"))).await.unwrap();
        assert_eq!(store.increment_failure("u1", Platform::LinkedIn).await.unwrap(), 1);
        assert_eq!(store.increment_failure("u1", Platform::LinkedIn).await.unwrap(), 2);

        store.save_tokens("u1", &record(Some("r2"))).await.unwrap();
        assert_eq!(store.failure_count("u1", Platform::LinkedIn), 0);
    }

    #[tokio::test]
    async fn scheduled_skips_exhausted_accounts() {
        let store = MemoryStore::new();
        let due = Utc::now();
        store.save_tokens("u1", &record(Some("r1"))).await.unwrap();
        store.save_tokens("u2", &record(Some("r2"))).await.unwrap();
        store.set_next_refresh("u1", Platform::LinkedIn, Some(due)).await.unwrap();
        store.set_next_refresh("u2", Platform::LinkedIn, Some(due)).await.unwrap();
        for _ in 0..3 {
            store.increment_failure("u2", Platform::LinkedIn).await.unwrap();
        }

        let scheduled = store.scheduled(3).await.unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].user_id, "u1");
    }
}
