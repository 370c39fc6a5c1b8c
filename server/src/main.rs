use std::sync::Arc;

use papconv::{load_config, logging, ConversionService, ServiceConfig, TextEngine};
use papconv_server::{create_router, AppState};

const CONFIG_ENV: &str = "PAPCONV_CONFIG";
const BIND_ENV: &str = "PAPCONV_BIND_ADDR";
const DEFAULT_BIND: &str = "127.0.0.1:8080";

fn load_service_config() -> Result<ServiceConfig, Box<dyn std::error::Error>> {
    match std::env::var(CONFIG_ENV) {
        Ok(path) => Ok(load_config(&path)?),
        Err(_) => {
            let base = default_data_dir();
            Ok(ServiceConfig::new(
                base.join("uploads").to_string_lossy(),
                base.join("output").to_string_lossy(),
            ))
        }
    }
}

fn default_data_dir() -> std::path::PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("."))
        .join("papconv-data")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::warn!(%error, "failed to capture Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                tracing::warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received; draining connections");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_service_config()?;
    logging::init(&config.logging)?;

    tracing::info!(
        "Starting papconv server ({} workers, uploads in {})",
        config.worker_count,
        config.upload_directory
    );

    let service = Arc::new(ConversionService::new(config, Arc::new(TextEngine::new()))?);
    let app = create_router(AppState::new(Arc::clone(&service)));

    let addr = std::env::var(BIND_ENV).unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight conversions finish before exiting.
    tokio::task::spawn_blocking(move || service.shutdown()).await?;
    tracing::info!("papconv server stopped");
    Ok(())
}
