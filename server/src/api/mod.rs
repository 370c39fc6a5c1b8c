//! API Module
//!
//! HTTP API layer. Each submodule handles endpoints for one area:
//! - `convert`: submissions, status, progress events and job artifacts
//! - `export`: export downloads and previews
//! - `settings`: base conversion settings
//! - `history`: conversion audit trail
//! - `health`: liveness and load

pub mod convert;
pub mod error;
pub mod export;
pub mod health;
pub mod history;
pub mod settings;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Files accepted in one batch request body, used to size the body limit.
const MAX_BATCH_FILES: u64 = 10;

/// Slack for multipart framing and the settings field.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

/// Create the API router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    let body_limit = state
        .service
        .config()
        .max_upload_bytes
        .saturating_mul(MAX_BATCH_FILES)
        .saturating_add(FORM_OVERHEAD_BYTES);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    Router::new()
        // Health
        .route("/api/health", get(health::health_check))
        // Submission
        .route("/api/convert", post(convert::convert_file))
        .route("/api/convert/url", post(convert::convert_url))
        .route("/api/convert/batch", post(convert::convert_batch))
        // Job status and artifacts
        .route("/api/convert/{id}", delete(convert::delete_job))
        .route("/api/convert/{id}/status", get(convert::get_status))
        .route("/api/convert/{id}/result", get(convert::get_result))
        .route("/api/convert/{id}/events", get(convert::job_events))
        .route("/api/convert/{id}/images", get(convert::list_images))
        .route(
            "/api/convert/{id}/images/{image_id}",
            get(convert::get_image),
        )
        .route("/api/convert/{id}/tables", get(convert::list_tables))
        .route(
            "/api/convert/{id}/tables/{table_id}/csv",
            get(convert::get_table_csv),
        )
        .route(
            "/api/convert/{id}/tables/{table_id}/image",
            get(convert::get_table_image),
        )
        .route("/api/convert/{id}/chunks", get(convert::list_chunks))
        // Exports
        .route("/api/export/{id}/{format}", get(export::get_export))
        .route(
            "/api/export/{id}/{format}/content",
            get(export::get_export_content),
        )
        // Settings
        .route(
            "/api/settings",
            get(settings::get_settings).put(settings::update_settings),
        )
        .route("/api/settings/reset", post(settings::reset_settings))
        .route("/api/settings/formats", get(settings::get_formats))
        // History
        .route("/api/history", get(history::list_history))
        .route("/api/history/stats", get(history::history_stats))
        .route(
            "/api/history/{id}",
            get(history::get_history_entry).delete(history::delete_history_entry),
        )
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}
