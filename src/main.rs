use anyhow::{Context, Result};
use kimvan_gateway::api::{create_router, RedirectAppState, TokenAppState};
use kimvan_gateway::cache::{run_cache_sweep, RedirectCache};
use kimvan_gateway::config::load_or_default;
use kimvan_gateway::credentials::{CredentialChain, TokenStore};
use kimvan_gateway::upstream::{build_client, TokenVerifier, UpstreamResolver};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kimvan_gateway=info".into()),
        )
        .init();

    info!("KimVan gateway starting...");

    let config_path = PathBuf::from(
        std::env::var("KIMVAN_CONFIG").unwrap_or_else(|_| "kimvan.toml".to_string()),
    );
    let config = load_or_default(&config_path)?;

    info!(
        config = %config_path.display(),
        bind_addr = %config.server.bind_addr,
        upstream = %config.upstream.base_url,
        token_file = %config.token.file.display(),
        cache_file = %config.cache.file.display(),
        "Configuration loaded"
    );

    let client = build_client(&config.upstream).context("Failed to build upstream HTTP client")?;

    let store = Arc::new(TokenStore::new(config.token.file.clone()));
    let cookie_defaults = config.token.cookie_defaults();

    let credentials = Arc::new(CredentialChain::from_config(
        &config.auth,
        Arc::clone(&store),
        cookie_defaults.clone(),
    ));
    info!(providers = ?credentials.provider_names(), "Credential providers ready");

    let verifier = Arc::new(TokenVerifier::new(
        client.clone(),
        config.upstream.base_url.clone(),
        config.upstream.whoami_path.clone(),
        config.upstream.listing_path.clone(),
        cookie_defaults,
    ));
    let resolver = Arc::new(UpstreamResolver::new(client, config.upstream.base_url.clone()));

    let cache = Arc::new(RedirectCache::new(&config.cache));
    match cache.entry_count().await {
        Ok(entries) => info!(entries = entries, "Redirect cache loaded"),
        Err(e) => warn!(
            path = %cache.path().display(),
            error = %e,
            "Redirect cache unreadable, it will be rebuilt on the next write"
        ),
    }

    // Start background cache sweep
    let sweep_handle = tokio::spawn(run_cache_sweep(
        Arc::clone(&cache),
        config.cache.sweep_interval_seconds,
    ));
    info!(
        interval_seconds = config.cache.sweep_interval_seconds,
        "Redirect cache sweep started"
    );

    let token_state = TokenAppState {
        store,
        verifier: Some(verifier),
        config: config.token.clone(),
    };
    let redirect_state = RedirectAppState::new(cache, resolver, credentials);
    let router = create_router(token_state, redirect_state, &config.server);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(bind_addr = %config.server.bind_addr, "HTTP API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "HTTP server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    server_handle.abort();
    sweep_handle.abort();
    info!("KimVan gateway stopped");

    Ok(())
}
