//! JSON HTTP surface over the dataset cache.

use crate::config::DashboardSettings;
use crate::error::{DatasetError, QueryError};
use crate::metrics::QueryMetrics;
use crate::query::cache::DatasetCache;
use crate::query::views::{self, ViewRequest};
use axum::{
    extract::Query,
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Extension, Router,
};
use hyper::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Shared state for every handler
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<DatasetCache>,
    pub settings: DashboardSettings,
}

/// Handler failures mapped onto HTTP statuses
#[derive(Debug)]
pub enum ApiError {
    Dataset(DatasetError),
    Query(QueryError),
}

impl From<DatasetError> for ApiError {
    fn from(e: DatasetError) -> Self {
        ApiError::Dataset(e)
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::Query(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        QueryMetrics::record_rejected();
        let (status, body) = match self {
            ApiError::Dataset(e) => {
                warn!("Dataset unavailable: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    serde_json::json!({
                        "error": "no data available, run the pipeline",
                        "detail": e.to_string(),
                    }),
                )
            }
            ApiError::Query(e) => (StatusCode::BAD_REQUEST, serde_json::json!({ "error": e.to_string() })),
        };
        (status, Json(body)).into_response()
    }
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "covid-dashboard",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Freshness and shape of the current snapshot
async fn status(Extension(state): Extension<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = state.cache.get().await?;
    let span = dataset.table.date_span();
    Ok(Json(serde_json::json!({
        "last_updated": dataset.last_updated,
        "dataset_version": dataset.version,
        "rows": dataset.table.len(),
        "entities": dataset.table.entities().len(),
        "start_date": span.map(|(s, _)| s),
        "end_date": span.map(|(_, e)| e),
    })))
}

/// Entity names available for selection
async fn entities(Extension(state): Extension<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = state.cache.get().await?;
    Ok(Json(serde_json::json!({ "entities": dataset.table.entities() })))
}

async fn view(
    Extension(state): Extension<AppState>,
    Query(request): Query<ViewRequest>,
) -> Result<Response, ApiError> {
    let config = request.into_config(&state.settings)?;
    let dataset = state.cache.get().await?;
    let payload = views::render(&dataset, &config)?;
    Ok(Json(payload).into_response())
}

/// Create the HTTP router with all routes
pub fn create_server(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/entities", get(entities))
        .route("/api/view", get(view))
        .layer(Extension(state))
        .layer(ServiceBuilder::new().layer(cors))
}

/// Start the HTTP server on the specified port
pub async fn start_server(state: AppState, port: u16) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_server(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "HTTP server listening");
    println!("🚀 HTTP server running on http://localhost:{port}");
    println!("💚 Health check: http://localhost:{port}/health");
    println!("📊 Views:        http://localhost:{port}/api/view?view=overview");

    Server::bind(&addr).serve(app.into_make_service()).await?;

    Ok(())
}
