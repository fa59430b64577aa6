//! Responses API handlers for the monolithic server
//!
//! Non-streaming requests return the finished `Response` as JSON. Streaming
//! requests get an SSE stream fed by the orchestrator's event channel;
//! dropping the stream (client disconnect) closes that channel, which the
//! orchestrator treats as cancellation.
//!
//! Stored responses can be listed, fetched, deleted and have their input
//! items read back.

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::builders::Response;
use super::constants::{
    DEFAULT_PAGINATION_LIMIT, OBJECT_TYPE_LIST, OBJECT_TYPE_RESPONSE_DELETED,
};
use super::errors::error_mapping;
use super::storage::{ListQuery, SortOrder};
use super::types::{Message, ResponseRequest};
use crate::{ApiError, AppState};

/// Query parameters for listing responses
#[derive(Debug, Deserialize)]
pub struct ListResponsesParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub after: Option<String>,
    #[serde(default)]
    pub order: Option<String>,
    pub model: Option<String>,
}

fn default_limit() -> usize {
    DEFAULT_PAGINATION_LIMIT
}

impl From<ListResponsesParams> for ListQuery {
    fn from(params: ListResponsesParams) -> Self {
        ListQuery {
            after: params.after.filter(|a| !a.is_empty()),
            limit: params.limit,
            order: match params.order.as_deref() {
                Some("asc") => SortOrder::Asc,
                _ => SortOrder::Desc,
            },
            model: params.model.filter(|m| !m.is_empty()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseListResponse {
    pub object: &'static str,
    pub data: Vec<Response>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InputItemListResponse {
    pub object: &'static str,
    pub data: Vec<Message>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedResponse {
    pub id: String,
    pub object: &'static str,
    pub deleted: bool,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/responses", post(create_response).get(list_responses))
        .route("/v1/responses/:id", get(get_response).delete(delete_response))
        .route("/v1/responses/:id/input_items", get(list_input_items))
        .route("/health-check", get(health_check))
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn create_response(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResponseRequest>,
) -> Result<axum::response::Response, ApiError> {
    let request_id = Uuid::new_v4();
    info!(
        "Responses request {} for model {} (stream: {})",
        request_id,
        body.model(),
        body.is_streaming()
    );

    if !body.is_streaming() {
        let response = state
            .engine
            .create_response(&body)
            .await
            .map_err(error_mapping::map_gateway_error)?;
        info!(
            "Request {} finished as {} with status {}",
            request_id,
            response.id,
            response.status.as_str()
        );
        return Ok(Json(response).into_response());
    }

    let rx = state
        .engine
        .create_response_stream(&body)
        .await
        .map_err(error_mapping::map_gateway_error)?;
    debug!("Request {} streaming", request_id);

    let event_stream =
        ReceiverStream::new(rx).map(|event| Ok::<_, Infallible>(event.to_sse_event()));
    Ok(Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// GET /v1/responses
async fn list_responses(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListResponsesParams>,
) -> Json<ResponseListResponse> {
    let query = ListQuery::from(params);
    debug!(
        "Listing responses (limit {}, order {:?}, after {:?})",
        query.limit, query.order, query.after
    );
    let page = state.engine.store().list(&query).await;

    Json(ResponseListResponse {
        object: OBJECT_TYPE_LIST,
        first_id: page.data.first().map(|r| r.id.clone()),
        last_id: page.data.last().map(|r| r.id.clone()),
        has_more: page.has_more,
        data: page.data,
    })
}

/// GET /v1/responses/{id}
async fn get_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Response>, ApiError> {
    debug!("Getting response {}", id);
    let stored = state.engine.store().get(&id).await.ok_or_else(|| {
        debug!("Response {} not found", id);
        ApiError::NotFound
    })?;
    Ok(Json(stored.response))
}

/// DELETE /v1/responses/{id}
async fn delete_response(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeletedResponse>, ApiError> {
    debug!("Deleting response {}", id);
    if !state.engine.store().delete(&id).await {
        debug!("Response {} not found during delete", id);
        return Err(ApiError::NotFound);
    }
    Ok(Json(DeletedResponse {
        id,
        object: OBJECT_TYPE_RESPONSE_DELETED,
        deleted: true,
    }))
}

/// GET /v1/responses/{id}/input_items
async fn list_input_items(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<InputItemListResponse>, ApiError> {
    debug!("Listing input items of response {}", id);
    let stored = state.engine.store().get(&id).await.ok_or(ApiError::NotFound)?;
    Ok(Json(InputItemListResponse {
        object: OBJECT_TYPE_LIST,
        data: stored.input,
        has_more: false,
    }))
}
