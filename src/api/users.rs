//! User API endpoints.

use axum::extract::{Path, State};

use super::{success, ApiResult};
use crate::errors::AppError;
use crate::models::{Post, UserProfile};
use crate::AppState;

/// GET /users - List all user profiles.
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<UserProfile>> {
    success(state.repo.list_users().await?)
}

/// GET /users/:id/posts - List the posts of one author.
pub async fn list_user_posts(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Post>> {
    if state.repo.get_user(&id).await?.is_none() {
        return Err(AppError::NotFound(format!("User {} not found", id)));
    }

    success(state.repo.list_posts_by_author(&id).await?)
}
