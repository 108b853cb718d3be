// Libra registry service.
// -----------------------
// Binds the RPC API and metrics listeners, seeds the in-memory stores, and
// keeps the tenant app snapshot fresh in the background. Durable store
// backends plug in behind the same traits without touching this bootstrap.
use anyhow::Context;
use registry::app::{build_router, AppState};
use registry::apps::{AppRegistry, MemoryAppConfigStore};
use registry::config::{load_app_specs, RegistryConfig};
use registry::observability;
use registry::store::{MemoryIdentityStore, MemoryNonceStore, MemorySessionStore};
use libra_stream::MemoryStreamStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RegistryConfig::from_env_or_yaml()?;
    let metrics_handle = observability::init_observability();

    let seed = match &config.apps_file {
        Some(path) => load_app_specs(path)?,
        None => Vec::new(),
    };
    let apps = Arc::new(AppRegistry::new(
        Arc::new(MemoryAppConfigStore::new(seed)),
        &config.common_permissions,
    )?);
    if let Err(err) = apps.refresh().await {
        tracing::warn!(error = %err, "failed to load apps");
    }

    let cancel = CancellationToken::new();
    tokio::spawn(apps.clone().run(cancel.clone()));
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState {
        env: config.env,
        nonce_ttl: config.nonce_ttl,
        apps,
        identity: Arc::new(MemoryIdentityStore::new()),
        sessions: Arc::new(MemorySessionStore::new()),
        nonces: Arc::new(MemoryNonceStore::new()),
        streams: Arc::new(MemoryStreamStore::new()),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "registry listening");
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        })
        .await?;
    Ok(())
}
