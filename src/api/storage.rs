//! Object store endpoints.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Extension,
};

use super::{success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{UploadQuery, UploadStatus};
use crate::storage::path_owner;
use crate::AppState;

/// POST /storage/*path - Append one upload chunk.
pub async fn upload_object(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(path): Path<String>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<UploadStatus> {
    match path_owner(&path) {
        Some(owner) if owner == user.uid => {}
        Some(_) => {
            return Err(AppError::Forbidden(
                "Uploads are only allowed under your own folder".to_string(),
            ))
        }
        None => {
            return Err(AppError::Validation(format!(
                "Object path must look like herb_images/{{uid}}/{{name}}, got {}",
                path
            )))
        }
    }

    success(
        state
            .storage
            .append_chunk(&path, query.offset, &body, query.r#final)
            .await?,
    )
}

/// GET /storage/*path - Download a committed object.
pub async fn download_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    let bytes = state.storage.read(&path).await?;
    Ok(([(header::CONTENT_TYPE, content_type(&path))], bytes).into_response())
}

fn content_type(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
