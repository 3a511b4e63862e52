use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use docshelf::config::AppConfig;
use docshelf::db;
use docshelf::routes;
use docshelf::state::AppState;
use docshelf::storage::LocalFileStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "server",
        environment = %config.environment,
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        connect_attempts = config.database_retry.attempts,
        server_host = %config.server_host,
        server_port = config.server_port,
        route_prefix = %config.route_prefix,
        upload_dir = %config.upload_dir.display(),
        "loaded backend configuration"
    );

    let pool = db::connect_with_retry(
        &config.database_url,
        config.database_max_pool_size,
        config.database_retry,
    )
    .await?;

    let storage = LocalFileStorage::new(config.upload_dir.clone());
    storage.ensure_directory_exists().await?;

    let listen_addr: SocketAddr =
        format!("{}:{}", config.server_host, config.server_port).parse()?;
    let state = AppState::new(pool, config, Arc::new(storage));
    let router = routes::create_router(state);

    let listener = TcpListener::bind(listen_addr).await?;
    tracing::info!("listening on {}", listen_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("server received shutdown signal");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
