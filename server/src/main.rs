use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tryon_service_cli::{
    image_processor::ImageProcessor, model::PlaceholderModel, pipeline::TryOnPipeline,
    storage::artifact_store,
};

use tryon_server::{
    config::Config, jobs::spawn_reaper, routes::app_router, state::AppState, tracker::JobTracker,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let pipeline = TryOnPipeline::new(
        Arc::new(ImageProcessor::new(config.fetch_timeout)?),
        Arc::new(PlaceholderModel::load(&config.model_path)),
        artifact_store(&config.storage),
        config.max_image_size,
    );
    let state = AppState::new(
        JobTracker::new(config.tracker.clone()),
        pipeline,
        config.max_concurrent_jobs,
    );

    let reaper = spawn_reaper(state.tracker.clone(), config.reaper_interval);
    let app = app_router(state, config.cors_layer()?);

    let listener = TcpListener::bind(config.addr()).await?;
    info!(addr = %listener.local_addr()?, "try-on service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reaper.abort();
    info!("try-on service stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
