//! Document endpoints: snapshot fetch, op ranges, submission.
//!
//! The HTTP surface covers one-shot interactions; continuous op delivery
//! goes over the WebSocket route.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tandem_engine::{Operation, Snapshot, Version};

use crate::backend::SubmitOutcome;
use crate::error::Result;
use crate::AppState;

/// Create document routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/docs/{collection}/{id}",
            get(fetch_handler).post(submit_handler),
        )
        .route("/docs/{collection}/{id}/ops", get(ops_handler))
}

/// Query parameters for an op-range read.
#[derive(Debug, Deserialize)]
pub struct OpsQuery {
    /// First version to include.
    #[serde(default)]
    pub from: Version,
    /// One past the last version to include; omitted reads to the current
    /// version.
    #[serde(default)]
    pub to: Option<Version>,
}

/// GET /docs/{collection}/{id} - read the current snapshot.
async fn fetch_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Snapshot>> {
    let snapshot = state.backend.fetch(&collection, &id).await?;
    Ok(Json(snapshot))
}

/// POST /docs/{collection}/{id} - submit one operation.
async fn submit_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Json(op): Json<Operation>,
) -> Result<Json<SubmitOutcome>> {
    let outcome = state.backend.submit(&collection, &id, op).await?;
    Ok(Json(outcome))
}

/// GET /docs/{collection}/{id}/ops - read committed operations.
async fn ops_handler(
    State(state): State<AppState>,
    Path((collection, id)): Path<(String, String)>,
    Query(query): Query<OpsQuery>,
) -> Result<Json<Vec<Operation>>> {
    let ops = state
        .backend
        .get_ops(&collection, &id, query.from, query.to)
        .await?;
    Ok(Json(ops))
}
