use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use social_auth::client::PlatformClient;
use social_auth::crypto::CryptoEngine;
use social_auth::providers::{self, ProviderRegistry};
use social_auth::ratelimit::RateLimiterRegistry;
use social_auth::scheduler::{refresh_daemon, RefreshScheduler};
use social_auth::store::{CredentialStore, MemoryStore, PgCredentialStore};
use social_auth::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "social_auth=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("social-auth v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = Arc::new(CryptoEngine::new(&config.master_key, &config.hmac_secret)?);

    let store: Arc<dyn CredentialStore> = if config.database_url.starts_with("memory://") {
        tracing::warn!("Using in-memory credential store, tokens are lost on restart");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgCredentialStore::new(&config.database_url, crypto.clone()).await?;
        pg.migrate().await?;
        info!("Database connected and migrated ✓");
        Arc::new(pg)
    };

    let mut registry = ProviderRegistry::new();
    providers::register_defaults(&mut registry, &config);
    info!("Registered {} platform providers", registry.count());
    let registry = Arc::new(registry);

    let scheduler = Arc::new(RefreshScheduler::new(
        store.clone(),
        registry.clone(),
        config.refresh.clone(),
    ));
    let restored = scheduler.restore().await?;
    info!("Restored {restored} scheduled refreshes ✓");

    let limiters = config
        .rate_limits
        .iter()
        .fold(RateLimiterRegistry::new(), |registry, &(platform, limit)| {
            info!(%platform, max_requests = limit.max_requests, window_secs = limit.window.as_secs(), "rate limit override");
            registry.with_limit(platform, limit)
        });
    let limiters = Arc::new(limiters);
    let client = PlatformClient::new(store.clone(), scheduler.clone(), limiters.clone())
        .with_max_attempts(config.api_max_attempts);

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        store,
        crypto,
        registry,
        scheduler: scheduler.clone(),
        limiters,
        client,
    });

    tokio::spawn(refresh_daemon(scheduler));

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
