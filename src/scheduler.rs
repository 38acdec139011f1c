//! Proactive token refresh for connected accounts.
//!
//! Instead of one timer per account, the scheduler keeps a due table
//! (`{user_id}-{platform}` → deadline) that a single sweep loop drains. Each
//! deadline is also persisted as `next_refresh_at`, so the table is rebuilt
//! from the credential store on startup.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::RefreshSettings;
use crate::error::AuthError;
use crate::platform::{account_key, Platform};
use crate::providers::ProviderRegistry;
use crate::store::CredentialStore;
use crate::token::TokenRecord;

#[derive(Debug, Clone)]
struct DueEntry {
    user_id: String,
    platform: Platform,
    due_at: DateTime<Utc>,
}

/// What [`RefreshScheduler::schedule_refresh`] did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// No expiry or no refresh token; nothing to do.
    Skipped,
    /// A refresh is due at this instant.
    Scheduled { due_at: DateTime<Utc> },
    /// The record was inside the buffer window and was refreshed immediately.
    Refreshed(TokenRecord),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct RefreshScheduler {
    store: Arc<dyn CredentialStore>,
    registry: Arc<ProviderRegistry>,
    settings: RefreshSettings,
    due: Mutex<HashMap<String, DueEntry>>,
    // serializes refreshes of one account so racing callers cannot overwrite each other
    inflight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<ProviderRegistry>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            due: Mutex::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    fn buffer(&self) -> ChronoDuration {
        ChronoDuration::from_std(self.settings.buffer).unwrap_or_else(|_| ChronoDuration::minutes(5))
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.inflight
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    /// Replace any pending refresh for (user, platform) based on `record`.
    ///
    /// Records inside the buffer window are refreshed before this returns.
    pub async fn schedule_refresh(
        &self,
        user_id: &str,
        platform: Platform,
        record: &TokenRecord,
    ) -> Result<ScheduleOutcome, AuthError> {
        self.cancel_refresh(user_id, platform);

        let expires_at = match (record.expires_at, &record.refresh_token) {
            (Some(expires_at), Some(_)) => expires_at,
            _ => {
                debug!(%platform, user_id, "token does not expire or cannot be refreshed, not scheduling");
                self.store.set_next_refresh(user_id, platform, None).await?;
                return Ok(ScheduleOutcome::Skipped);
            }
        };

        let due_at = expires_at - self.buffer();
        if due_at <= Utc::now() {
            let key = account_key(user_id, platform);
            let lock = self.key_lock(&key);
            let _guard = lock.lock().await;
            let refreshed = self.refresh_locked(user_id, record).await?;
            return Ok(ScheduleOutcome::Refreshed(refreshed));
        }

        self.arm(user_id, platform, due_at).await?;
        Ok(ScheduleOutcome::Scheduled { due_at })
    }

    /// Drop the pending refresh for (user, platform). Must be called on disconnect.
    ///
    /// Returns whether a refresh was pending.
    pub fn cancel_refresh(&self, user_id: &str, platform: Platform) -> bool {
        let key = account_key(user_id, platform);
        self.due.lock().remove(&key).is_some()
    }

    /// Remove an account: its pending refresh and its stored tokens.
    ///
    /// Waits for an in-flight refresh of the same account to finish first, so
    /// that refresh cannot write the row back or re-arm it afterwards. Returns
    /// the deleted record, or `None` if the account was not connected.
    pub async fn disconnect(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<TokenRecord>, AuthError> {
        let key = account_key(user_id, platform);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        self.cancel_refresh(user_id, platform);
        let existing = self.store.get_tokens(user_id, platform).await?;
        let deleted = self.store.delete(user_id, platform).await?;

        // callers already queued on this lock still need it; they will find no row
        let mut inflight = self.inflight.lock();
        if inflight
            .get(&key)
            .is_some_and(|l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) <= 2)
        {
            inflight.remove(&key);
        }

        Ok(existing.filter(|_| deleted))
    }

    /// Refresh an account now, outside its schedule.
    ///
    /// With `stale_access`, nothing is sent if the stored access token already
    /// differs from it (another caller refreshed first); the stored record is
    /// returned instead.
    pub async fn refresh(
        &self,
        user_id: &str,
        platform: Platform,
        stale_access: Option<&str>,
    ) -> Result<TokenRecord, AuthError> {
        let key = account_key(user_id, platform);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let current = self
            .store
            .get_tokens(user_id, platform)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("{platform} account")))?;

        if let Some(stale) = stale_access {
            if current.access_token != stale {
                debug!(%platform, user_id, "token already refreshed by another caller");
                return Ok(current);
            }
        }

        self.refresh_locked(user_id, &current).await
    }

    async fn refresh_locked(
        &self,
        user_id: &str,
        record: &TokenRecord,
    ) -> Result<TokenRecord, AuthError> {
        let platform = record.platform;
        let refresh_token = record.refresh_token.clone().ok_or_else(|| {
            AuthError::RefreshFailed(format!("{platform} account has no refresh token"))
        })?;

        let provider = self.registry.require(platform)?;

        match provider.refresh_token(&refresh_token).await {
            Ok(tokens) => {
                let fresh = tokens.into_record(
                    platform,
                    Utc::now(),
                    provider.token_ttl(),
                    Some(refresh_token),
                );
                self.store.save_tokens(user_id, &fresh).await?;

                if let Some(expires_at) = fresh.expires_at {
                    // never earlier than now, a short-lived token waits for the next sweep
                    let due_at = (expires_at - self.buffer()).max(Utc::now());
                    self.arm(user_id, platform, due_at).await?;
                }

                info!(%platform, user_id, expires_at = ?fresh.expires_at, "refreshed token");
                Ok(fresh)
            }
            Err(e) => {
                error!(%platform, user_id, "token refresh failed: {e}");
                if let Err(store_err) = self.record_failure(user_id, platform).await {
                    error!(%platform, user_id, "failed to record refresh failure: {store_err}");
                }
                Err(e)
            }
        }
    }

    async fn arm(
        &self,
        user_id: &str,
        platform: Platform,
        due_at: DateTime<Utc>,
    ) -> Result<(), AuthError> {
        let key = account_key(user_id, platform);
        self.due.lock().insert(
            key,
            DueEntry {
                user_id: user_id.to_string(),
                platform,
                due_at,
            },
        );
        self.store.set_next_refresh(user_id, platform, Some(due_at)).await
    }

    /// Re-arm with linear backoff, or give up after `max_failures` in a row.
    async fn record_failure(&self, user_id: &str, platform: Platform) -> Result<(), AuthError> {
        let failures = self.store.increment_failure(user_id, platform).await?;

        if failures >= self.settings.max_failures {
            warn!(
                %platform,
                user_id,
                failures,
                "giving up on token refresh, account needs re-authentication"
            );
            self.cancel_refresh(user_id, platform);
            return self.store.set_next_refresh(user_id, platform, None).await;
        }

        let backoff = self.settings.sweep_interval * failures.max(1);
        let due_at = Utc::now()
            + ChronoDuration::from_std(backoff).unwrap_or_else(|_| ChronoDuration::minutes(1));
        self.arm(user_id, platform, due_at).await
    }

    /// Refresh every account whose deadline is at or before `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let due: Vec<DueEntry> = {
            let mut table = self.due.lock();
            let keys: Vec<String> = table
                .iter()
                .filter(|(_, e)| e.due_at <= now)
                .map(|(k, _)| k.clone())
                .collect();
            keys.iter().filter_map(|k| table.remove(k)).collect()
        };

        let mut report = SweepReport::default();
        if due.is_empty() {
            return report;
        }

        info!("Found {} accounts to refresh", due.len());

        for entry in due {
            match self.refresh(&entry.user_id, entry.platform, None).await {
                Ok(_) => report.refreshed += 1,
                Err(_) => report.failed += 1,
            }
        }

        report
    }

    /// Rebuild the due table from persisted `next_refresh_at` values.
    pub async fn restore(&self) -> Result<usize, AuthError> {
        let scheduled = self.store.scheduled(self.settings.max_failures).await?;
        let count = scheduled.len();

        let mut table = self.due.lock();
        for s in scheduled {
            table.insert(
                account_key(&s.user_id, s.platform),
                DueEntry {
                    user_id: s.user_id,
                    platform: s.platform,
                    due_at: s.due_at,
                },
            );
        }

        Ok(count)
    }

    /// Deadline of the pending refresh for (user, platform), if any.
    pub fn due_at(&self, user_id: &str, platform: Platform) -> Option<DateTime<Utc>> {
        self.due
            .lock()
            .get(&account_key(user_id, platform))
            .map(|e| e.due_at)
    }

    pub fn pending_count(&self) -> usize {
        self.due.lock().len()
    }
}

/// Sweep the due table forever at the configured interval.
pub async fn refresh_daemon(scheduler: Arc<RefreshScheduler>) {
    let interval = scheduler.settings.sweep_interval;
    info!(
        "Token refresh daemon started (interval: {}s, buffer: {}s)",
        interval.as_secs(),
        scheduler.settings.buffer.as_secs()
    );

    loop {
        tokio::time::sleep(interval).await;
        let report = scheduler.sweep(Utc::now()).await;
        if report.failed > 0 {
            warn!(
                refreshed = report.refreshed,
                failed = report.failed,
                "refresh sweep finished with failures"
            );
        }
    }
}
