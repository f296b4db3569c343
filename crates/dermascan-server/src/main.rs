use anyhow::Context;
use clap::Parser;
use dermascan_server::{AppState, FsArtifactLoader, ServerConfig, logging, router};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let config = ServerConfig::parse();
    logging::init(config.debug);

    if config.database_url.is_some() {
        tracing::warn!("DATABASE_URL is set but no storage is wired up; ignoring it");
    }

    let loader = FsArtifactLoader::new(config.model_path.clone(), config.labels_path.clone());
    let state = AppState::new(config.app_name.clone(), loader)
        .with_max_upload_bytes(config.max_upload_bytes);

    if config.eager_load {
        let service = state.service.clone();
        let warm_up = tokio::task::spawn_blocking(move || service.cache().ensure_loaded().map(|_| ()))
            .await
            .context("Model warm-up task panicked")?;
        if let Err(err) = warm_up {
            tracing::error!("Eager model load failed, will retry on first request: {err}");
        }
    }

    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("{} listening on http://{addr}", config.app_name);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
