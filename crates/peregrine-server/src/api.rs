use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use async_graphql::http::GraphiQLSource;
use peregrine_common::config::AppConfig;
use peregrine_core::{QueryEngine, QueryError};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub engine: QueryEngine,
    pub config: AppConfig,
    pub start_time: std::time::Instant,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/graphs", get(list_graphs))
        .route("/graphiql/:graph", get(graphiql))
        .route("/graphql/:graph", post(graphql))
        .route("/graphql/:graph/mapping", get(field_mapping))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state)
}

async fn root() -> &'static str {
    "Peregrine is running."
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    uptime_secs: u64,
    cached_graphs: usize,
    schema_rebuilds: u64,
    auth_fetches: u64,
    schemas: Vec<SchemaSummary>,
}

#[derive(Serialize)]
struct SchemaSummary {
    graph: String,
    version: String,
    built_at: String,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cache = state.engine.schema_cache();
    let stats = cache.stats();
    let schemas = cache
        .compiled()
        .await
        .iter()
        .map(|compiled| SchemaSummary {
            graph: compiled.graph.clone(),
            version: compiled.version.clone(),
            built_at: compiled.built_at.to_rfc3339(),
        })
        .collect();

    Json(HealthResponse {
        status: "ok",
        service: state.config.auth.service_name.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        cached_graphs: stats.graphs,
        schema_rebuilds: stats.rebuilds,
        auth_fetches: state.engine.auth_cache().fetch_count(),
        schemas,
    })
}

async fn list_graphs(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.store().list_graphs().await {
        Ok(graphs) => Json(serde_json::json!({ "graphs": graphs })).into_response(),
        Err(e) => {
            tracing::error!("Failed to list graphs: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

async fn graphiql(Path(graph): Path<String>) -> Html<String> {
    Html(
        GraphiQLSource::build()
            .endpoint(&format!("/graphql/{}", graph))
            .finish(),
    )
}

fn credential(headers: &HeaderMap) -> &str {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

async fn graphql(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
    headers: HeaderMap,
    Json(request): Json<async_graphql::Request>,
) -> Response {
    match state.engine.query(&graph, credential(&headers), request).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => error_response(e),
    }
}

async fn field_mapping(
    State(state): State<Arc<AppState>>,
    Path(graph): Path<String>,
    headers: HeaderMap,
) -> Response {
    match state.engine.field_mapping(&graph, credential(&headers)).await {
        Ok(mapping) => Json(mapping).into_response(),
        Err(e) => error_response(e),
    }
}

fn error_response(err: QueryError) -> Response {
    let status = match err {
        QueryError::SchemaUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!("GraphQL request failed: {}", err);
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}
