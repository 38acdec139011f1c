mod facebook;
mod linkedin;
mod registry;
mod traits;
mod twitter;
mod youtube;

pub use facebook::GraphProvider;
pub use linkedin::LinkedInProvider;
pub use registry::ProviderRegistry;
pub use traits::{OAuthProvider, TokenSet};
pub use twitter::TwitterProvider;
pub use youtube::YouTubeProvider;

use std::sync::Arc;

use crate::config::Config;

/// Register every platform that has client credentials configured.
pub fn register_defaults(registry: &mut ProviderRegistry, config: &Config) {
    if let (Some(id), Some(secret)) = (&config.twitter_client_id, &config.twitter_client_secret) {
        registry.register(Arc::new(TwitterProvider::new(id.clone(), secret.clone())));
    }

    // Facebook and Instagram share one app
    if let (Some(id), Some(secret)) = (&config.facebook_app_id, &config.facebook_app_secret) {
        registry.register(Arc::new(GraphProvider::facebook(id.clone(), secret.clone())));
        registry.register(Arc::new(GraphProvider::instagram(id.clone(), secret.clone())));
    }

    if let (Some(id), Some(secret)) = (&config.linkedin_client_id, &config.linkedin_client_secret) {
        registry.register(Arc::new(LinkedInProvider::new(id.clone(), secret.clone())));
    }

    if let (Some(id), Some(secret)) = (&config.youtube_client_id, &config.youtube_client_secret) {
        registry.register(Arc::new(YouTubeProvider::new(id.clone(), secret.clone())));
    }
}
