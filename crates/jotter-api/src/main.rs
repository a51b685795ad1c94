mod auth;
mod config;
mod error;
mod forms;
mod rate_limit;
mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use config::AppConfig;
use jotter_core::services::DatabaseService;
use jotter_core::storage::R2Storage;
use routes::{app_router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jotter_api=info".parse()?),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting jotter-api with config: {:?}", config);

    let notes = DatabaseService::open_path(&config.database_path).await?;
    let store = R2Storage::new(config.r2.clone(), config.media.clone());
    if let Err(error) = store.bucket_is_reachable().await {
        tracing::warn!(error = %error, "R2 bucket is not reachable; uploads will fail");
    }

    let state = AppState::new(config, notes, Arc::new(store));
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("jotter-api listening on {}", bind_addr);
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
