use std::sync::Arc;

use clap::Parser;
use profilepic_core::loader::load_model;
use profilepic_server::{config::Settings, router, AppState};
use tokio::{net::TcpListener, signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Err(err) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        tracing::warn!("Logger already initialized: {err}");
    };

    let settings = Settings::parse();
    tracing::debug!(?settings, "starting");

    let model_path = settings.model_path.clone();
    let model = tokio::task::spawn_blocking(move || load_model().path(model_path).call()).await?;
    let state = AppState::builder()
        .model(model)
        .normalization(settings.normalization)
        .build();
    tracing::info!(
        model = state.model.status(),
        input_size = state.preprocessor.size(),
        normalization = %state.preprocessor.normalization(),
        "service ready"
    );

    let app = router(Arc::new(state), settings.body_limit_bytes);
    let listener = TcpListener::bind(settings.address()).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
