use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Credentials for one connected (user, platform) account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub platform: Platform,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    /// A record can only be proactively refreshed if it both expires and carries a refresh token.
    pub fn is_refreshable(&self) -> bool {
        self.expires_at.is_some() && self.refresh_token.is_some()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// A set of tokens returned from a platform after code exchange or refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
}

impl TokenSet {
    /// Normalize into a record, stamping `expires_at = now + expires_in`.
    ///
    /// `default_ttl` is used when the platform omits `expires_in`. A platform that
    /// does not rotate refresh tokens keeps `previous_refresh`.
    pub fn into_record(
        self,
        platform: Platform,
        now: DateTime<Utc>,
        default_ttl: std::time::Duration,
        previous_refresh: Option<String>,
    ) -> TokenRecord {
        let lifetime = self.expires_in.unwrap_or(default_ttl.as_secs());
        TokenRecord {
            platform,
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: Some(now + Duration::seconds(lifetime as i64)),
        }
    }
}
