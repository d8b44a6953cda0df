//! Bearer-token authentication module.
//!
//! Tokens have the form `{token_id}.{secret}`. The ID locates the row, the secret
//! is compared in constant time to mitigate timing attacks. Passwords are stored
//! as argon2 PHC strings.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::db::{Repository, TokenKind, TokenRecord};
use crate::errors::AppError;
use crate::models::AuthSession;
use crate::AppState;

/// Lifetime of refresh tokens.
pub const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Identity attached to a request by [`bearer_auth_layer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

/// Bearer authentication layer: resolves the id token and stores [`AuthUser`]
/// in the request extensions.
pub async fn bearer_auth_layer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim().to_string());

    let Some(token) = bearer else {
        return AppError::Unauthorized("Missing bearer token".to_string()).into_response();
    };

    match authenticate(&state.repo, &token).await {
        Ok(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Resolve an id token to the user it was issued to.
pub async fn authenticate(repo: &Repository, raw_token: &str) -> Result<AuthUser, AppError> {
    let record = resolve_token(repo, raw_token, TokenKind::Id).await?;
    let email = repo
        .get_user_email(&record.user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("Token owner no longer exists".to_string()))?;

    Ok(AuthUser {
        uid: record.user_id,
        email,
    })
}

/// Look up a token and check its secret, kind and expiry.
pub async fn resolve_token(
    repo: &Repository,
    raw_token: &str,
    kind: TokenKind,
) -> Result<TokenRecord, AppError> {
    let invalid = || AppError::Unauthorized("Invalid or expired token".to_string());

    let (id, secret) = raw_token.split_once('.').ok_or_else(invalid)?;
    let record = repo.get_token(id).await?.ok_or_else(invalid)?;

    if !constant_time_compare(secret, &record.secret) {
        return Err(invalid());
    }
    if record.kind != kind || record.expires_at <= Utc::now() {
        return Err(invalid());
    }

    Ok(record)
}

/// Issue a fresh id token and refresh token pair.
pub async fn issue_session(
    repo: &Repository,
    uid: &str,
    email: &str,
    id_token_ttl: Duration,
) -> Result<AuthSession, AppError> {
    let id_token = issue_token(repo, uid, TokenKind::Id, id_token_ttl).await?;
    let refresh_token = issue_token(repo, uid, TokenKind::Refresh, REFRESH_TOKEN_TTL).await?;

    Ok(AuthSession {
        uid: uid.to_string(),
        email: email.to_string(),
        id_token,
        refresh_token,
        expires_in: id_token_ttl.as_secs(),
    })
}

async fn issue_token(
    repo: &Repository,
    uid: &str,
    kind: TokenKind,
    ttl: Duration,
) -> Result<String, AppError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|e| AppError::Internal(format!("Token lifetime out of range: {}", e)))?;

    let record = TokenRecord {
        id: uuid::Uuid::new_v4().simple().to_string(),
        secret: format!(
            "{}{}",
            uuid::Uuid::new_v4().simple(),
            uuid::Uuid::new_v4().simple()
        ),
        user_id: uid.to_string(),
        kind,
        expires_at: Utc::now() + ttl,
    };
    repo.insert_token(&record).await?;

    Ok(format!("{}.{}", record.id, record.secret))
}

/// Hash a password into a PHC string on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, AppError> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || hash_password_blocking(&password))
        .await
        .map_err(|e| AppError::Internal(format!("Password hashing task failed: {}", e)))?
}

/// Check a password against a stored PHC string on the blocking pool.
pub async fn verify_password(password: &str, stored_hash: &str) -> Result<bool, AppError> {
    let password = password.to_string();
    let stored_hash = stored_hash.to_string();
    tokio::task::spawn_blocking(move || verify_password_blocking(&password, &stored_hash))
        .await
        .map_err(|e| AppError::Internal(format!("Password check task failed: {}", e)))
}

fn hash_password_blocking(password: &str) -> Result<String, AppError> {
    let salt = SaltString::encode_b64(uuid::Uuid::new_v4().as_bytes())
        .map_err(|e| AppError::Internal(format!("Salt generation failed: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

fn verify_password_blocking(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        tracing::warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Perform constant-time string comparison.
fn constant_time_compare(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();

    // Constant-time comparison
    a_bytes.ct_eq(b_bytes).into()
}
