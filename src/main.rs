mod auth;
mod codec;
mod config;
mod error;
mod forward;
mod liveness;
mod pending;
mod registry;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use config::Config;
use error::GatewayError;
use registry::Registry;

#[tokio::main]
async fn main() {
    let config = Config::load();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(config.filter_directive())
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(err) = run(config).await {
        error!(error = %err, "fatal startup error");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), GatewayError> {
    let plugin = Arc::new(auth::init(&config).await?);
    let registry = Arc::new(Registry::new());

    let http_addr: SocketAddr = format!("{}:{}", config.host, config.http_port)
        .parse()
        .map_err(|_| {
            GatewayError::Bind(
                config.host.clone(),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad HOST/HTTP_PORT"),
            )
        })?;
    let ws_addr: SocketAddr = format!("{}:{}", config.host, config.websocket_port)
        .parse()
        .map_err(|_| {
            GatewayError::Bind(
                config.host.clone(),
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad HOST/WEBSOCKET_PORT"),
            )
        })?;

    let http_app = forward::router(registry.clone())
        .layer(DefaultBodyLimit::max(forward::MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let ws_app = session::router(registry.clone(), plugin.clone())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let http_listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .map_err(|e| GatewayError::Bind(http_addr.to_string(), e))?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr)
        .await
        .map_err(|e| GatewayError::Bind(ws_addr.to_string(), e))?;

    info!("HTTP forwarder listening on http://{}/forward/v1/:deviceKey/*", http_addr);
    info!("Controller endpoint listening on ws://{}/socket/v1", ws_addr);

    let http_server = axum::serve(http_listener, http_app);
    let ws_server = axum::serve(ws_listener, ws_app);

    tokio::try_join!(
        async { http_server.await.map_err(|e| GatewayError::Bind(http_addr.to_string(), e)) },
        async { ws_server.await.map_err(|e| GatewayError::Bind(ws_addr.to_string(), e)) },
    )?;

    Ok(())
}
