use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthError;

/// Social platforms an account can be connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Facebook,
    Instagram,
    LinkedIn,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 5] = [
        Platform::Twitter,
        Platform::Facebook,
        Platform::Instagram,
        Platform::LinkedIn,
        Platform::YouTube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
            Platform::LinkedIn => "linkedin",
            Platform::YouTube => "youtube",
        }
    }

    /// Base URL outbound API calls for this platform are made against.
    pub fn api_base_url(&self) -> &'static str {
        match self {
            Platform::Twitter => "https://api.twitter.com/2",
            Platform::Facebook | Platform::Instagram => "https://graph.facebook.com/v18.0",
            Platform::LinkedIn => "https://api.linkedin.com/v2",
            Platform::YouTube => "https://www.googleapis.com/youtube/v3",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            "linkedin" => Ok(Platform::LinkedIn),
            "youtube" => Ok(Platform::YouTube),
            other => Err(AuthError::UnknownPlatform(other.to_string())),
        }
    }
}

/// Key identifying one connected account: `{user_id}-{platform}`.
pub fn account_key(user_id: &str, platform: Platform) -> String {
    format!("{user_id}-{platform}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("YouTube".parse::<Platform>().unwrap(), Platform::YouTube);
        assert_eq!("x".parse::<Platform>().unwrap(), Platform::Twitter);
        assert!("myspace".parse::<Platform>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Platform::LinkedIn).unwrap();
        assert_eq!(json, "\"linkedin\"");
    }

    #[test]
    fn account_key_joins_user_and_platform() {
        assert_eq!(account_key("u1", Platform::Instagram), "u1-instagram");
    }
}
