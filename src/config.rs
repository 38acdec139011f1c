use anyhow::{Context, Result};
use std::time::Duration;

use crate::platform::Platform;
use crate::ratelimit::RateLimit;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    pub base_url: String,
    /// Dashboard frontend URL for post-OAuth redirects
    pub dashboard_url: String,

    // ── Database ────────────────────────────────────────────────────────
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM encryption.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,

    // ── Service-to-service auth ─────────────────────────────────────────
    pub auth_service_secret: String,

    // ── Token lifecycle ─────────────────────────────────────────────────
    pub refresh: RefreshSettings,
    pub api_max_attempts: u32,
    /// Per-platform quota overrides from `{PLATFORM}_RATE_LIMIT` / `{PLATFORM}_RATE_WINDOW_SECS`.
    pub rate_limits: Vec<(Platform, RateLimit)>,

    // ── Platform Credentials ────────────────────────────────────────────
    pub twitter_client_id: Option<String>,
    pub twitter_client_secret: Option<String>,
    /// Shared by Facebook and Instagram (Instagram business accounts use the Facebook app).
    pub facebook_app_id: Option<String>,
    pub facebook_app_secret: Option<String>,
    pub linkedin_client_id: Option<String>,
    pub linkedin_client_secret: Option<String>,
    pub youtube_client_id: Option<String>,
    pub youtube_client_secret: Option<String>,
}

/// Knobs for the refresh scheduler.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Refresh this long before `expires_at`.
    pub buffer: Duration,
    /// How often the sweep loop scans the due table.
    pub sweep_interval: Duration,
    /// Consecutive failures after which an account stops being refreshed.
    pub max_failures: u32,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            buffer: Duration::from_secs(5 * 60),
            sweep_interval: Duration::from_secs(60),
            max_failures: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = RefreshSettings::default();

        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8430".into())
                .parse()
                .context("Invalid PORT")?,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8430".into()),
            dashboard_url: std::env::var("DASHBOARD_URL")
                .unwrap_or_else(|_| "http://localhost:3000".into()),

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,
            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,

            auth_service_secret: std::env::var("AUTH_SERVICE_SECRET")
                .context("AUTH_SERVICE_SECRET is required for service-to-service auth")?,

            refresh: RefreshSettings {
                buffer: secs_var("REFRESH_BUFFER_SECS", defaults.buffer)?,
                sweep_interval: secs_var("REFRESH_SWEEP_SECS", defaults.sweep_interval)?,
                max_failures: std::env::var("REFRESH_MAX_FAILURES")
                    .ok()
                    .map(|v| v.parse())
                    .transpose()
                    .context("Invalid REFRESH_MAX_FAILURES")?
                    .unwrap_or(defaults.max_failures),
            },
            api_max_attempts: std::env::var("API_MAX_ATTEMPTS")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("Invalid API_MAX_ATTEMPTS")?
                .unwrap_or(3),
            rate_limits: rate_limit_overrides(|name| std::env::var(name).ok())?,

            twitter_client_id: std::env::var("TWITTER_CLIENT_ID").ok(),
            twitter_client_secret: std::env::var("TWITTER_CLIENT_SECRET").ok(),
            facebook_app_id: std::env::var("FACEBOOK_APP_ID").ok(),
            facebook_app_secret: std::env::var("FACEBOOK_APP_SECRET").ok(),
            linkedin_client_id: std::env::var("LINKEDIN_CLIENT_ID").ok(),
            linkedin_client_secret: std::env::var("LINKEDIN_CLIENT_SECRET").ok(),
            youtube_client_id: std::env::var("YOUTUBE_CLIENT_ID").ok(),
            youtube_client_secret: std::env::var("YOUTUBE_CLIENT_SECRET").ok(),
        })
    }

    /// Get the OAuth callback URL for a specific platform.
    pub fn callback_url(&self, platform: Platform) -> String {
        format!("{}/v1/oauth/callback/{}", self.base_url, platform)
    }
}

fn secs_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(v) => {
            let secs: u64 = v.parse().with_context(|| format!("Invalid {name}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(default),
    }
}

/// Quotas for platforms with either variable set; the other falls back to the default.
fn rate_limit_overrides(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<(Platform, RateLimit)>> {
    let mut overrides = Vec::new();
    for platform in Platform::ALL {
        let prefix = platform.as_str().to_ascii_uppercase();
        let max_var = format!("{prefix}_RATE_LIMIT");
        let window_var = format!("{prefix}_RATE_WINDOW_SECS");

        let max = lookup(&max_var)
            .map(|v| v.parse::<u32>())
            .transpose()
            .with_context(|| format!("Invalid {max_var}"))?;
        let window = lookup(&window_var)
            .map(|v| v.parse::<u64>())
            .transpose()
            .with_context(|| format!("Invalid {window_var}"))?;
        if max.is_none() && window.is_none() {
            continue;
        }

        let default = RateLimit::default_for(platform);
        overrides.push((
            platform,
            RateLimit {
                max_requests: max.unwrap_or(default.max_requests),
                window: window.map(Duration::from_secs).unwrap_or(default.window),
            },
        ));
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn rate_limit_overrides_fill_missing_half_from_defaults() {
        let overrides = rate_limit_overrides(lookup(&[
            ("TWITTER_RATE_LIMIT", "50"),
            ("YOUTUBE_RATE_WINDOW_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(
            overrides,
            vec![
                (Platform::Twitter, RateLimit::new(50, 15 * 60)),
                (Platform::YouTube, RateLimit::new(100, 60)),
            ]
        );
    }

    #[test]
    fn malformed_rate_limit_is_rejected() {
        let err = rate_limit_overrides(lookup(&[("LINKEDIN_RATE_LIMIT", "lots")])).unwrap_err();
        assert!(err.to_string().contains("LINKEDIN_RATE_LIMIT"));
    }

    #[test]
    fn refresh_defaults_use_five_minute_buffer() {
        let settings = RefreshSettings::default();
        assert_eq!(settings.buffer, Duration::from_secs(300));
        assert_eq!(settings.max_failures, 3);
    }

    #[test]
    fn secs_var_falls_back_to_default() {
        let d = secs_var("SOCIAL_AUTH_TEST_UNSET_VAR", Duration::from_secs(7)).unwrap();
        assert_eq!(d, Duration::from_secs(7));
    }
}
