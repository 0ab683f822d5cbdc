//! Tandem Server binary: wire the authority to HTTP and WebSocket.

use axum::Router;
use std::sync::Arc;
use tandem_engine::ot::TypeRegistry;
use tandem_server::backend::Backend;
use tandem_server::config::Config;
use tandem_server::pubsub::MemoryPubSub;
use tandem_server::storage::MemoryStorage;
use tandem_server::websocket::ConnectionManager;
use tandem_server::{routes, AppState};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tandem Server on {}:{}", config.host, config.port);

    // Assemble the authority with the in-process collaborators
    let registry = Arc::new(TypeRegistry::with_defaults());
    let backend = Backend::new(
        registry,
        Arc::new(MemoryStorage::new()),
        Arc::new(MemoryPubSub::new()),
    )
    .with_max_retries(config.max_submit_retries);

    let state = AppState {
        backend: Arc::new(backend),
        config: Arc::new(config.clone()),
        conn_manager: ConnectionManager::new_shared(),
    };

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
