//! REST surface over the data-mapping layer
//!
//! - `GET /:entity` lists rows; `fields=a,b` projects and
//!   `where.<column>.<op>=<value>` filters (`in`/`nin` take comma lists)
//! - `POST /:entity` creates a row
//! - `PUT /:entity/:id` updates a row
//! - `DELETE /:entity/:id` deletes a row
//! - `GET /health`
//!
//! Every operation carries a request context built from the request
//! headers, so decorated entities authorize it.

use crate::error::AuthzError;
use crate::store::{DeleteOptions, EntityOperations, FindOptions, InMemoryDatabase, SaveOptions};
use crate::types::{condition, Record, RequestContext, Where};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared router state
#[derive(Clone)]
pub struct AppState {
    db: Arc<InMemoryDatabase>,
}

impl AppState {
    pub fn new(db: Arc<InMemoryDatabase>) -> Self {
        Self { db }
    }

    fn entity(&self, name: &str) -> Result<Arc<dyn EntityOperations>, ApiError> {
        self.db
            .entity(name)
            .ok_or_else(|| ApiError::NotFound(format!("unknown entity '{}'", name)))
    }
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// HTTP-facing error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            ApiError::Authz(e) if e.is_unauthorized() => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::Authz(AuthzError::EntityNotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::Authz(AuthzError::InvalidInput(_)) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Authz(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

fn request_context(headers: HeaderMap) -> Option<Arc<RequestContext>> {
    Some(Arc::new(RequestContext::new(headers)))
}

fn parse_query(params: &HashMap<String, String>) -> Result<(Option<Where>, Option<Vec<String>>), ApiError> {
    let mut filter = Where::new();
    let mut fields = None;

    for (key, raw) in params {
        if key == "fields" {
            fields = Some(raw.split(',').map(|f| f.trim().to_string()).filter(|f| !f.is_empty()).collect());
            continue;
        }

        let Some(rest) = key.strip_prefix("where.") else {
            return Err(ApiError::BadRequest(format!("unknown query parameter '{}'", key)));
        };
        let Some((column, op)) = rest.rsplit_once('.') else {
            return Err(ApiError::BadRequest(format!("filter '{}' needs an operator", key)));
        };

        let value = match op {
            "in" | "nin" => Value::Array(raw.split(',').map(|v| Value::String(v.trim().to_string())).collect()),
            _ => Value::String(raw.clone()),
        };
        filter
            .entry(column.to_string())
            .or_default()
            .extend(condition(op, value));
    }

    Ok(((!filter.is_empty()).then_some(filter), fields))
}

// Numeric ids stay numbers so stored keys compare equal.
fn key_value(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| Value::String(id.to_string()))
}

/// GET /:entity
async fn list(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Record>>, ApiError> {
    let ops = state.entity(&entity)?;
    let (filter, fields) = parse_query(&params)?;

    let rows = ops
        .find(FindOptions {
            filter,
            fields,
            ctx: request_context(headers),
        })
        .await?;
    Ok(Json(rows))
}

/// POST /:entity
async fn create(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Record>,
) -> Result<Json<Record>, ApiError> {
    let ops = state.entity(&entity)?;
    let saved = ops
        .save(SaveOptions {
            input,
            fields: None,
            ctx: request_context(headers),
        })
        .await?;
    Ok(Json(saved))
}

/// PUT /:entity/:id
async fn update(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(mut input): Json<Record>,
) -> Result<Json<Record>, ApiError> {
    let ops = state.entity(&entity)?;
    input.insert(ops.meta().primary_key().to_string(), key_value(&id));

    let saved = ops
        .save(SaveOptions {
            input,
            fields: None,
            ctx: request_context(headers),
        })
        .await?;
    Ok(Json(saved))
}

/// DELETE /:entity/:id
async fn remove(
    State(state): State<AppState>,
    Path((entity, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<Record>, ApiError> {
    let ops = state.entity(&entity)?;
    let mut filter = Where::new();
    filter.insert(ops.meta().primary_key().to_string(), condition("eq", key_value(&id)));

    let deleted = ops
        .delete(DeleteOptions {
            filter: Some(filter),
            fields: None,
            ctx: request_context(headers),
        })
        .await?;

    deleted
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {}", entity, id)))
}

/// GET /health
async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": crate::VERSION,
    }))
}

/// Create the HTTP router
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/health", get(health))
        .route("/:entity", get(list).post(create))
        .route("/:entity/:id", put(update).delete(remove))
        .layer(
            ServiceBuilder::new()
                .layer(trace)
                .layer(cors)
        )
        .with_state(state)
}
