//! Account and token API endpoints.

use axum::{extract::State, Extension, Json};

use super::{success, ApiResult};
use crate::auth::{self, AuthUser};
use crate::db::TokenKind;
use crate::errors::AppError;
use crate::models::{
    AuthSession, CreateUserRequest, CreateUserResponse, RefreshTokenRequest, SignInRequest,
    VerifyTokenRequest, VerifyTokenResponse,
};
use crate::AppState;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

/// POST /create_user - Register an account and its profile.
pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> ApiResult<CreateUserResponse> {
    let email = request.email.trim();
    if email.is_empty() || request.password.is_empty() || request.nickname.trim().is_empty() {
        return Err(AppError::Validation(
            "Email, password and nickname are required".to_string(),
        ));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("Invalid email address".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password_hash = auth::hash_password(&request.password).await?;
    let profile = state
        .repo
        .create_user(
            email,
            &password_hash,
            request.nickname.trim(),
            request.avatar.as_deref().filter(|a| !a.is_empty()),
        )
        .await?;

    tracing::info!("Created user {}", profile.id);
    success(CreateUserResponse { uid: profile.id })
}

/// POST /auth/sign_in - Exchange email and password for tokens.
pub async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<SignInRequest>,
) -> ApiResult<AuthSession> {
    let rejected = || AppError::Unauthorized("Invalid email or password".to_string());

    let credentials = state
        .repo
        .find_credentials(request.email.trim())
        .await?
        .ok_or_else(rejected)?;

    if !auth::verify_password(&request.password, &credentials.password_hash).await? {
        return Err(rejected());
    }

    if let Err(e) = state.repo.purge_expired_tokens(chrono::Utc::now()).await {
        tracing::warn!("Failed to purge expired tokens: {}", e);
    }

    let session = auth::issue_session(
        &state.repo,
        &credentials.user_id,
        &credentials.email,
        state.config.id_token_ttl,
    )
    .await?;

    tracing::info!("User {} signed in", credentials.user_id);
    success(session)
}

/// POST /auth/token - Trade a refresh token for a new token pair.
pub async fn refresh_token(
    State(state): State<AppState>,
    Json(request): Json<RefreshTokenRequest>,
) -> ApiResult<AuthSession> {
    let record = auth::resolve_token(&state.repo, &request.refresh_token, TokenKind::Refresh).await?;
    // Single use: whoever deletes the token first wins the exchange
    if !state.repo.revoke_token(&record.id).await? {
        return Err(AppError::Unauthorized(
            "Invalid or expired token".to_string(),
        ));
    }
    let email = state
        .repo
        .get_user_email(&record.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token owner no longer exists".to_string()))?;

    let session =
        auth::issue_session(&state.repo, &record.user_id, &email, state.config.id_token_ttl)
            .await?;
    success(session)
}

/// POST /auth/sign_out - Revoke every token of the caller.
pub async fn sign_out(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<()> {
    let revoked = state.repo.revoke_tokens(&user.uid).await?;
    tracing::info!("User {} signed out ({} tokens revoked)", user.uid, revoked);
    success(())
}

/// POST /verify_token - Check an id token and return its owner.
pub async fn verify_token(
    State(state): State<AppState>,
    Json(request): Json<VerifyTokenRequest>,
) -> ApiResult<VerifyTokenResponse> {
    if request.id_token.trim().is_empty() {
        return Err(AppError::Validation("Token is required".to_string()));
    }

    let user = auth::authenticate(&state.repo, request.id_token.trim()).await?;
    success(VerifyTokenResponse { uid: user.uid })
}
