use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use papconv::db::{HistoryEntry, HistoryFilter, HistoryStats};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Query parameters for the history listing. All optional.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub input_format: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub items: Vec<HistoryEntry>,
    pub total: u64,
}

/// GET /api/history
pub async fn list_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryPage>> {
    let filter = HistoryFilter {
        status: query.status,
        input_format: query.input_format,
        limit: query.limit,
        offset: query.offset,
    };

    let (items, total) = state.run(move |service| Ok(service.history(&filter)?)).await?;
    Ok(Json(HistoryPage { items, total }))
}

/// GET /api/history/stats
pub async fn history_stats(State(state): State<AppState>) -> ApiResult<Json<HistoryStats>> {
    let stats = state.run(|service| Ok(service.history_stats()?)).await?;
    Ok(Json(stats))
}

/// GET /api/history/{id}
pub async fn get_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HistoryEntry>> {
    let lookup = id.clone();
    state
        .run(move |service| Ok(service.history_entry(&lookup)?))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("History entry {} not found", id)))
}

/// DELETE /api/history/{id}
///
/// Removes the row and the job's outputs.
pub async fn delete_history_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state
        .run(move |service| Ok(service.delete_history_entry(&id)?))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
