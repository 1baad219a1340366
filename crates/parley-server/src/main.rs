mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State, WebSocketUpgrade},
    http::HeaderValue,
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_api::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::Gateway;
use parley_gateway::auth::JwtAuthenticator;
use parley_gateway::connection;

use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,parley_gateway=debug,parley_api=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    if config.uses_dev_secret() {
        warn!("PARLEY_JWT_SECRET is not set; using the development secret");
    }

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Shared state
    let auth = Arc::new(JwtAuthenticator::new(
        db.clone(),
        config.jwt_secret.clone(),
        config.token_ttl,
    ));
    let gateway = Gateway::new(config.gateway.clone(), auth.clone(), db.clone());
    let app_state: AppState = Arc::new(AppStateInner {
        db,
        auth,
        gateway: gateway.clone(),
    });

    // Routes
    let ws_route = Router::new()
        .route("/chat/ws/{token}", get(ws_upgrade))
        .with_state(gateway.clone());

    let app = parley_api::router(app_state)
        .merge(ws_route)
        .layer(cors_layer(&config.allowed_origins))
        .layer(TraceLayer::new_for_http());

    info!("Parley server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(gateway))
        .await?;

    Ok(())
}

async fn ws_upgrade(
    State(gateway): State<Gateway>,
    Path(token): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, gateway, token))
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Waits for Ctrl-C, then closes every gateway connection so each one runs
/// its offline cleanup before the listener stops.
async fn shutdown_signal(gateway: Gateway) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down, closing gateway connections");
    gateway.shutdown().await;
}
