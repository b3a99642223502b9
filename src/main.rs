use anyhow::Context;
use imagesim::{create_router, init, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize the application
    init()?;

    let config = Config::from_env()?;
    log::info!(
        "Similarity threshold {}, database {}",
        config.similarity_threshold,
        config.database_path.display()
    );

    // Without durable storage no request can succeed
    let state = AppState::open(config.clone())
        .with_context(|| format!("cannot open database {}", config.database_path.display()))?;

    let app = create_router(state);

    // Set up the server
    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {}", addr))?;
    log::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for shutdown signal: {}", e);
    }
}
