use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod embed;
mod guard;
mod notify;
mod reconciler;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    let store = Arc::new(store::MemoryStore::new());
    let guard = Arc::new(guard::SessionCreationGuard::new(
        config.session_creation_cooldown,
    ));
    let sink = Arc::new(notify::LogSink);
    let _embedder = embed::FacenetClient::new(config.facenet_url.clone(), config.embed_timeout)?;
    let _reconciler =
        reconciler::Reconciler::new(store, sink, guard, config.match_threshold);

    // TODO: serve the HTTP transport binding once the surrounding ERP routes land
    tracing::info!(
        threshold = config.match_threshold,
        facenet = %config.facenet_url,
        "rollcalld ready"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
