mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lunchbox_api::identity::HttpIdentityLookup;
use lunchbox_api::{AppState, AppStateInner, RoundOrchestrator};
use lunchbox_db::{Database, RoundRegistry};
use lunchbox_gateway::{Dispatcher, Hub, connection};

use crate::config::Config;

#[derive(Clone)]
struct GatewayState {
    hub: Hub,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lunchbox=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    // Storage, restored into the live registry
    let db = Arc::new(Database::open(&config.db_path)?);
    let registry = RoundRegistry::load(db)?;

    // Notification fan-out goes through the gateway hub
    let hub = Hub::new();
    let dispatcher = Dispatcher::new(Arc::new(hub.clone()));

    let identity = HttpIdentityLookup::new(&config.identity_url, config.identity_timeout)?;
    let mut orchestrator = RoundOrchestrator::new(registry, Arc::new(identity), dispatcher)
        .with_identity_timeout(config.identity_timeout);
    if let Some(seed) = config.selection_seed {
        info!("Round selection seeded with {}", seed);
        orchestrator = orchestrator.with_seed(seed);
    }

    let app_state: AppState = Arc::new(AppStateInner {
        orchestrator,
        jwt_secret: config.jwt_secret.clone(),
        admins: config.admins.clone(),
    });

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(GatewayState {
            hub,
            jwt_secret: config.jwt_secret.clone(),
        });

    let app = lunchbox_api::router(app_state)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.addr()?;
    info!("Lunchbox server listening on {}", addr);
    info!("Identity service at {}", config.identity_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.hub, state.jwt_secret)
    })
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
