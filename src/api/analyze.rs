//! Plant analysis endpoint.

use axum::{extract::State, Extension, Json};

use super::{success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{AnalyzeRequest, PlantAnalysis};
use crate::AppState;

/// POST /analyze_plant_image - Identify the plant in an uploaded image.
pub async fn analyze_plant_image(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<PlantAnalysis> {
    let image_url = request.image_url.trim();
    if image_url.is_empty() {
        return Err(AppError::Validation("imageUrl is required".to_string()));
    }

    match state.analyzer.analyze(image_url).await {
        Ok(analysis) => {
            tracing::info!("Analyzed image for {}: {}", user.uid, analysis.plant_name);
            success(analysis)
        }
        Err(e) => {
            tracing::warn!("Plant analysis failed for {}: {}", user.uid, e);
            Err(e)
        }
    }
}
