//! Post API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use super::{success, ApiResult};
use crate::auth::AuthUser;
use crate::errors::AppError;
use crate::models::{CreatePostRequest, LikeResponse, ListPostsQuery, Post};
use crate::AppState;

/// Page size when the query omits `limit`.
pub const DEFAULT_PAGE_LIMIT: u32 = 10;
/// Largest accepted `limit`.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// GET /posts - List one page of posts, newest first.
pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<ListPostsQuery>,
) -> ApiResult<Vec<Post>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let start_after = query.start_after.as_deref().filter(|c| !c.is_empty());

    success(state.repo.list_posts(limit, start_after).await?)
}

/// GET /posts/:id - Get a single post.
pub async fn get_post(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Post> {
    match state.repo.get_post(&id).await? {
        Some(post) => success(post),
        None => Err(AppError::NotFound(format!("Post {} not found", id))),
    }
}

/// POST /posts - Create a new post on behalf of the caller.
pub async fn create_post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<Post> {
    // Validate required fields
    if request.title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".to_string()));
    }
    if request.author_id != user.uid {
        return Err(AppError::Forbidden(
            "Posts can only be created for the signed-in user".to_string(),
        ));
    }

    let post = state.repo.create_post(&request).await?;
    tracing::info!("User {} created post {}", user.uid, post.id);
    success(post)
}

/// POST /posts/:id/like - Increment the like counter.
pub async fn like_post(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<LikeResponse> {
    let like_count = state.repo.like_post(&id).await?;
    success(LikeResponse { id, like_count })
}
