use std::collections::HashMap;
use std::sync::Arc;

use super::traits::OAuthProvider;
use crate::error::AuthError;
use crate::platform::Platform;

/// Registry of configured platform providers.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<dyn OAuthProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any previous one for the same platform.
    pub fn register(&mut self, provider: Arc<dyn OAuthProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(&platform).cloned()
    }

    /// Like [`get`](Self::get) but errors for unconfigured platforms.
    pub fn require(&self, platform: Platform) -> Result<Arc<dyn OAuthProvider>, AuthError> {
        self.get(platform)
            .ok_or_else(|| AuthError::PlatformNotConfigured(platform.to_string()))
    }

    /// Configured platforms in a stable order.
    pub fn list(&self) -> Vec<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|p| self.providers.contains_key(p))
            .collect()
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{GraphProvider, YouTubeProvider};

    #[test]
    fn lists_registered_platforms_in_order() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(YouTubeProvider::new("id".into(), "s".into())));
        registry.register(Arc::new(GraphProvider::facebook("id".into(), "s".into())));

        assert_eq!(registry.list(), vec![Platform::Facebook, Platform::YouTube]);
        assert!(registry.require(Platform::Twitter).is_err());
    }
}
