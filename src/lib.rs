pub mod api;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod platform;
pub mod providers;
pub mod ratelimit;
pub mod scheduler;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::AuthError;
pub use platform::Platform;
pub use token::TokenRecord;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn store::CredentialStore>,
    pub crypto: Arc<crypto::CryptoEngine>,
    pub registry: Arc<providers::ProviderRegistry>,
    pub scheduler: Arc<scheduler::RefreshScheduler>,
    pub limiters: Arc<ratelimit::RateLimiterRegistry>,
    pub client: client::PlatformClient,
}

pub type SharedState = Arc<AppState>;
