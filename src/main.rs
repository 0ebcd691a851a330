use std::time::Duration;
use anyhow::Context;
use tracing_subscriber::EnvFilter;
use gelscan::{
    config::Config,
    handlers,
    services::{JobManager, JobRegistry, UploadStore},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing, RUST_LOG overrides the default filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("gelscan=info,tower_http=info")),
        )
        .init();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // The registry lives for the lifetime of the process only
    let registry = JobRegistry::new();
    let manager = JobManager::new(config.pipeline.clone(), registry);
    let uploads = UploadStore::new(&config.upload);

    let diagnostics = manager.diagnostics();
    if !diagnostics.tool_available || !diagnostics.definition_exists {
        tracing::warn!("Pipeline not fully available: {:?}", diagnostics);
    }

    // Periodically drop stale uploads
    let sweeper = uploads.clone();
    let max_age = Duration::from_secs(config.upload.max_age_hours * 3600);
    let sweep_every = Duration::from_secs(config.upload.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            if let Err(e) = sweeper.purge_older_than(max_age).await {
                tracing::error!("Failed to sweep uploads in {}: {}", sweeper.dir().display(), e);
            }
        }
    });

    let state = AppState::new(manager, uploads, &config.analysis);
    let app = handlers::build_router(state, config.upload.max_file_size);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;
    tracing::info!("Server running on {}", addr);

    axum::serve(listener, app.into_make_service())
        .await
        .context("Failed to start server")?;

    Ok(())
}
