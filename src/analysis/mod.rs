//! Plant analyzer seam for `POST /analyze_plant_image`.
//!
//! The identification model itself is an external service; the backend only
//! forwards the image URL to whichever analyzer it was built with.

use async_trait::async_trait;

use crate::errors::AppError;
use crate::models::PlantAnalysis;

/// Identifies the plant in a publicly fetchable image.
#[async_trait]
pub trait PlantAnalyzer: Send + Sync + 'static {
    async fn analyze(&self, image_url: &str) -> Result<PlantAnalysis, AppError>;
}

/// Analyzer used when no identification service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableAnalyzer;

#[async_trait]
impl PlantAnalyzer for UnavailableAnalyzer {
    async fn analyze(&self, _image_url: &str) -> Result<PlantAnalysis, AppError> {
        Err(AppError::AnalysisUnavailable(
            "No plant identification service is configured".to_string(),
        ))
    }
}
