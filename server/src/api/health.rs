use axum::{extract::State, Json};
use papconv::HealthReport;

use crate::state::AppState;

/// GET /api/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health())
}
