#![forbid(unsafe_code)]

use threadhub_adapter::grpc_api::{db, net};
use threadhub_adapter::{AdapterConfig, AdapterRuntime};
use tonic::transport::Server;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AdapterConfig::from_env()?;
    let runtime = AdapterRuntime::new(&config)?;

    info!(
        bind = %config.bind,
        store = ?config.store_path,
        max_threads_per_owner = config.guard.max_threads_per_owner,
        internal_session = config.guard.internal_session.is_some(),
        "threadhub_grpc listening"
    );
    Server::builder()
        .add_service(db::api_server::ApiServer::new(runtime.guarded_db()))
        .add_service(net::api_server::ApiServer::new(runtime.guarded_net()))
        .serve_with_shutdown(config.bind, shutdown_signal())
        .await?;
    info!("threadhub_grpc stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
