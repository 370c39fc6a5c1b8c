//! Export downloads under `/api/export`.

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use papconv::storage::ArtifactFile;
use papconv::ExportFormat;
use serde::Serialize;

use super::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ExportContent {
    pub format: ExportFormat,
    pub content: String,
}

fn parse_format(format: &str) -> ApiResult<ExportFormat> {
    format.parse().map_err(ApiError::BadRequest)
}

/// Wraps artifact bytes in an attachment response.
pub(crate) fn download(file: ArtifactFile) -> Response {
    let filename = file.filename.replace(['"', '\\'], "_");
    (
        [
            (header::CONTENT_TYPE, file.mime_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        file.bytes,
    )
        .into_response()
}

/// GET /api/export/{id}/{format}
pub async fn get_export(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> ApiResult<Response> {
    let format = parse_format(&format)?;
    let file = state
        .run(move |service| Ok(service.get_export(&id, format)?))
        .await?;
    Ok(download(file))
}

/// GET /api/export/{id}/{format}/content
pub async fn get_export_content(
    State(state): State<AppState>,
    Path((id, format)): Path<(String, String)>,
) -> ApiResult<Json<ExportContent>> {
    let format = parse_format(&format)?;
    let content = state
        .run(move |service| Ok(service.get_export_content(&id, format)?))
        .await?;
    Ok(Json(ExportContent { format, content }))
}
