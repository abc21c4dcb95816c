use std::sync::Arc;

use anyhow::Context;

use pantry_api::app::services::{AppServices, DynStore};
use pantry_infra::Settings;
use pantry_infra::store::{InMemoryInventoryStore, PostgresInventoryStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pantry_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;

    let store: DynStore = if settings.use_persistent_stores {
        let url = settings
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set when USE_PERSISTENT_STORES is on")?;
        let store = PostgresInventoryStore::connect(url, settings.store_timeout)
            .await
            .context("failed to connect to postgres")?;
        store.ensure_schema().await.context("failed to prepare schema")?;
        tracing::info!("using postgres inventory store");
        Arc::new(store)
    } else {
        tracing::warn!("using in-memory inventory store; data is lost on restart");
        Arc::new(InMemoryInventoryStore::new())
    };

    let services = Arc::new(AppServices::start(store, &settings).context("failed to start services")?);
    let app = pantry_api::app::build_app(Arc::clone(&services));

    let listener = tokio::net::TcpListener::bind(settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .context("server error")?;

    // Worker joins block; keep them off the runtime threads.
    tokio::task::spawn_blocking(move || services.shutdown()).await?;
    Ok(())
}
