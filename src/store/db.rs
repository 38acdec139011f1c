//! PostgreSQL-backed credential store.
//!
//! Table `social_accounts`: tokens per (user_id, platform), sealed to their
//! account key, plus the persisted refresh schedule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::sync::Arc;

use super::{AccountInfo, CredentialStore, ScheduledRefresh};
use crate::crypto::CryptoEngine;
use crate::error::AuthError;
use crate::platform::{account_key, Platform};
use crate::token::TokenRecord;

pub struct PgCredentialStore {
    pool: PgPool,
    crypto: Arc<CryptoEngine>,
}

impl PgCredentialStore {
    pub async fn new(db_url: &str, crypto: Arc<CryptoEngine>) -> Result<Self, AuthError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| AuthError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS social_accounts (
                id              UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                user_id         TEXT NOT NULL,
                platform        TEXT NOT NULL,
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                expires_at      TIMESTAMPTZ,
                next_refresh_at TIMESTAMPTZ,
                failure_count   INT NOT NULL DEFAULT 0,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE(user_id, platform)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Older deployments predate the persisted schedule
        sqlx::query(
            "ALTER TABLE social_accounts ADD COLUMN IF NOT EXISTS next_refresh_at TIMESTAMPTZ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_social_accounts_next_refresh ON social_accounts(next_refresh_at) WHERE next_refresh_at IS NOT NULL",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn open_opt(&self, account: &str, value: Option<String>) -> Result<Option<String>, AuthError> {
        match value {
            Some(ref v) if !v.is_empty() => Ok(Some(self.crypto.open_token(account, v)?)),
            _ => Ok(None),
        }
    }
}

fn parse_platform(row: &PgRow, idx: usize) -> Result<Platform, AuthError> {
    let raw: String = row.get(idx);
    raw.parse()
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn save_tokens(&self, user_id: &str, record: &TokenRecord) -> Result<(), AuthError> {
        let account = account_key(user_id, record.platform);
        let enc_access = self.crypto.seal_token(&account, &record.access_token)?;
        let enc_refresh = self.crypto.seal_opt(&account, record.refresh_token.as_deref())?;

        sqlx::query(
            r#"
            INSERT INTO social_accounts
                (user_id, platform, access_token, refresh_token, expires_at, failure_count)
            VALUES ($1, $2, $3, $4, $5, 0)
            ON CONFLICT (user_id, platform)
            DO UPDATE SET
                access_token = EXCLUDED.access_token,
                refresh_token = COALESCE(EXCLUDED.refresh_token, social_accounts.refresh_token),
                expires_at = EXCLUDED.expires_at,
                failure_count = 0,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(record.platform.as_str())
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_tokens(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<Option<TokenRecord>, AuthError> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, expires_at
            FROM social_accounts
            WHERE user_id = $1 AND platform = $2
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let enc_access: String = row.get(0);
        let enc_refresh: Option<String> = row.try_get(1)?;
        let expires_at: Option<DateTime<Utc>> = row.try_get(2)?;

        let account = account_key(user_id, platform);
        Ok(Some(TokenRecord {
            platform,
            access_token: self.crypto.open_token(&account, &enc_access)?,
            refresh_token: self.open_opt(&account, enc_refresh)?,
            expires_at,
        }))
    }

    async fn delete(&self, user_id: &str, platform: Platform) -> Result<bool, AuthError> {
        let affected = sqlx::query("DELETE FROM social_accounts WHERE user_id = $1 AND platform = $2")
            .bind(user_id)
            .bind(platform.as_str())
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<AccountInfo>, AuthError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, platform, expires_at, next_refresh_at,
                   refresh_token IS NOT NULL, failure_count, created_at, updated_at
            FROM social_accounts
            WHERE user_id = $1
            ORDER BY platform
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<AccountInfo, AuthError> {
                let failures: i32 = row.get(5);
                Ok(AccountInfo {
                    user_id: row.get(0),
                    platform: parse_platform(row, 1)?,
                    expires_at: row.try_get(2)?,
                    next_refresh_at: row.try_get(3)?,
                    has_refresh_token: row.get(4),
                    failure_count: failures.max(0) as u32,
                    created_at: row.get(6),
                    updated_at: row.get(7),
                })
            })
            .collect()
    }

    async fn set_next_refresh(
        &self,
        user_id: &str,
        platform: Platform,
        at: Option<DateTime<Utc>>,
    ) -> Result<(), AuthError> {
        sqlx::query(
            "UPDATE social_accounts SET next_refresh_at = $1 WHERE user_id = $2 AND platform = $3",
        )
        .bind(at)
        .bind(user_id)
        .bind(platform.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn increment_failure(
        &self,
        user_id: &str,
        platform: Platform,
    ) -> Result<u32, AuthError> {
        let row = sqlx::query(
            r#"
            UPDATE social_accounts
            SET failure_count = failure_count + 1, updated_at = NOW()
            WHERE user_id = $1 AND platform = $2
            RETURNING failure_count
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let count: i32 = row.map(|r| r.get(0)).unwrap_or(0);
        Ok(count.max(0) as u32)
    }

    async fn scheduled(&self, max_failures: u32) -> Result<Vec<ScheduledRefresh>, AuthError> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, platform, next_refresh_at, failure_count
            FROM social_accounts
            WHERE next_refresh_at IS NOT NULL
              AND refresh_token IS NOT NULL
              AND failure_count < $1
            ORDER BY next_refresh_at
            "#,
        )
        .bind(max_failures as i32)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScheduledRefresh, AuthError> {
                let failures: i32 = row.get(3);
                Ok(ScheduledRefresh {
                    user_id: row.get(0),
                    platform: parse_platform(row, 1)?,
                    due_at: row.get(2),
                    failure_count: failures.max(0) as u32,
                })
            })
            .collect()
    }
}
