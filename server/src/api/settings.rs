use axum::{extract::State, Json};
use papconv::{ConversionSettings, SettingsOverride, SupportedFormats};

use super::error::ApiResult;
use crate::state::AppState;

/// GET /api/settings
pub async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<ConversionSettings>> {
    let settings = state.run(|service| Ok(service.settings()?)).await?;
    Ok(Json(settings))
}

/// PUT /api/settings
///
/// Merges the partial body over the stored settings. Jobs already submitted
/// keep the settings they were admitted with.
pub async fn update_settings(
    State(state): State<AppState>,
    Json(overrides): Json<SettingsOverride>,
) -> ApiResult<Json<ConversionSettings>> {
    let settings = state
        .run(move |service| Ok(service.update_settings(&overrides)?))
        .await?;
    Ok(Json(settings))
}

/// POST /api/settings/reset
pub async fn reset_settings(State(state): State<AppState>) -> ApiResult<Json<ConversionSettings>> {
    let settings = state.run(|service| Ok(service.reset_settings()?)).await?;
    Ok(Json(settings))
}

/// GET /api/settings/formats
pub async fn get_formats(State(state): State<AppState>) -> Json<SupportedFormats> {
    Json(state.service.formats())
}
