use anyhow::Result;
use std::sync::Arc;

use stdio_bridge::{bridge::ProcessBridge, config::Configuration, logging, router, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    logging::init_tracing();

    // Load configuration
    let configuration = Configuration::new()?;
    tracing::info!(
        base_url = %configuration.server.base_url,
        worker = %configuration.worker.command,
        credentials_dir = %configuration.credentials_dir().display(),
        "Configuration loaded successfully"
    );

    let addr = format!(
        "{}:{}",
        configuration.server.host, configuration.server.port
    );

    let app_state = AppState::from_config(configuration)?;
    let cleanup = app_state.oauth.attempts().spawn_cleanup();
    let bridge = app_state.bridge.clone();

    let app = router(app_state);

    // Start server
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(bridge.clone()))
        .await?;

    cleanup.abort();

    // Give supervisors a moment to reap their workers
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while bridge.session_count() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    tracing::info!("Server stopped");
    Ok(())
}

// Open streams only end once their sessions do, so sessions are cancelled
// before axum starts waiting on connections.
async fn shutdown_signal(bridge: Arc<ProcessBridge>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
    bridge.shutdown();
}
