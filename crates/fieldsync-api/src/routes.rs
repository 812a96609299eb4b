use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, put};
use axum::{Json, Router};
use chrono::Utc;
use fieldsync_core::sync::{
    ChangesPage, ChangesQuery, DeleteBody, DeleteRequest, UpsertBody, UpsertRequest,
};
use fieldsync_core::{InMemoryRemote, RecordId, RemoteStore, StoredRecord, SyncCursor};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::verify_token;
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    store: InMemoryRemote,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self::new(config, InMemoryRemote::new())
    }

    pub const fn new(config: Arc<AppConfig>, store: InMemoryRemote) -> Self {
        Self { config, store }
    }
}

pub fn app_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route(
            "/collections/{collection}/records/{id}",
            put(upsert_record).delete(delete_record),
        )
        .route("/collections/{collection}/changes", get(list_changes))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

async fn require_auth(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    verify_token(request.headers(), state.config.api_token.as_deref())?;
    Ok(next.run(request).await)
}

fn parse_record_id(raw: &str) -> Result<RecordId, AppError> {
    raw.parse::<RecordId>()
        .map_err(|error| AppError::bad_request(error.to_string()))
}

async fn upsert_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<UpsertBody>,
) -> Result<Json<StoredRecord>, AppError> {
    let record_id = parse_record_id(&id)?;
    let stored = state
        .store
        .upsert(UpsertRequest {
            collection,
            record_id,
            operation_id: body.operation_id,
            payload: body.payload,
            client_updated_at: body.client_updated_at,
            base_version: body.base_version,
        })
        .await?;
    tracing::info!(
        endpoint = "upsert",
        key = %stored.key(),
        operation_id = %body.operation_id,
        updated_at = stored.updated_at,
        "Stored record"
    );
    Ok(Json(stored))
}

async fn delete_record(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(body): Json<DeleteBody>,
) -> Result<Json<StoredRecord>, AppError> {
    let record_id = parse_record_id(&id)?;
    let stored = state
        .store
        .delete(DeleteRequest {
            collection,
            record_id,
            operation_id: body.operation_id,
            base_version: body.base_version,
        })
        .await?;
    tracing::info!(
        endpoint = "delete",
        key = %stored.key(),
        operation_id = %body.operation_id,
        updated_at = stored.updated_at,
        "Stored tombstone"
    );
    Ok(Json(stored))
}

async fn list_changes(
    State(state): State<AppState>,
    Path(collection): Path<String>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangesPage>, AppError> {
    let max = state.config.max_page_size;
    let limit = query.limit.unwrap_or(max).clamp(1, max);
    let since = query
        .since
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(SyncCursor::new);

    let page = state
        .store
        .changes(&collection, since.as_ref(), limit)
        .await?;
    tracing::debug!(
        endpoint = "changes",
        collection = %collection,
        records = page.records.len(),
        has_more = page.has_more,
        "Served change page"
    );
    Ok(Json(page))
}
