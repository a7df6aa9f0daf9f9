use peregrine_common::{config::AppConfig, GraphDump};
use peregrine_core::{AuthScopeCache, EngineConfig, HttpAuthorizationService, MemoryGraphStore, QueryEngine};
use std::net::SocketAddr;
use std::sync::Arc;

mod api;

use api::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    match dotenvy::dotenv() {
        Ok(path) => tracing::info!("Loaded .env from: {:?}", path),
        Err(e) => tracing::warn!("Failed to load .env file: {}. Using system environment variables.", e),
    }

    let config = AppConfig::load().expect("Failed to load configuration");
    tracing::info!("Authorization mapping URL: {}", config.auth.mapping_url);
    tracing::info!("Authorization service name: {}", config.auth.service_name);

    let store = match &config.store.seed_path {
        Some(path) => {
            let dumps = GraphDump::load_all(path).expect("Failed to load graph seed file");
            tracing::info!("Seeding in-memory store from {} ({} graphs)", path, dumps.len());
            MemoryGraphStore::from_dumps(dumps)
        }
        None => {
            tracing::warn!("No store.seed_path configured, starting with an empty in-memory store");
            MemoryGraphStore::new()
        }
    };

    let authorization = HttpAuthorizationService::new(config.auth.mapping_url.clone(), config.auth_request_timeout());
    let auth = Arc::new(AuthScopeCache::new(
        Arc::new(authorization),
        config.auth.service_name.clone(),
        config.scope_ttl(),
    ));
    let engine = QueryEngine::new(Arc::new(store), auth, EngineConfig::from(&config));

    let http_addr: SocketAddr = config
        .server
        .http_addr
        .parse()
        .expect("Invalid server.http_addr");

    let state = Arc::new(AppState {
        engine,
        config,
        start_time: std::time::Instant::now(),
    });
    let app = api::router(state);

    tracing::info!("HTTP API listening on {}", http_addr);
    tracing::info!("GraphiQL available at http://{}/graphiql/<graph>", http_addr);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .expect("Failed to bind HTTP listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to install CTRL+C handler: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received.");
        })
        .await
        .expect("HTTP server failed");

    tracing::info!("Peregrine server stopped.");
}
