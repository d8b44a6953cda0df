//! Database repository for users, tokens and posts.
//!
//! Uses prepared statements throughout. Token secrets are returned to the caller
//! for comparison; this module never decides whether a token is valid.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp};
use crate::errors::AppError;
use crate::models::{CreatePostRequest, Post, UserProfile};

/// Kind of an issued token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Id,
    Refresh,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Id => "id",
            TokenKind::Refresh => "refresh",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "id" => Some(TokenKind::Id),
            "refresh" => Some(TokenKind::Refresh),
            _ => None,
        }
    }
}

/// Stored token row.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub id: String,
    pub secret: String,
    pub user_id: String,
    pub kind: TokenKind,
    pub expires_at: DateTime<Utc>,
}

/// Stored credentials for sign-in.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub email: String,
    pub password_hash: String,
}

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== USER OPERATIONS ====================

    /// Create a user with an already hashed password.
    pub async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        nickname: &str,
        avatar: Option<&str>,
    ) -> Result<UserProfile, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO users (id, email, password_hash, nickname, avatar, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(email)
        .bind(password_hash)
        .bind(nickname)
        .bind(avatar)
        .bind(format_timestamp(now))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(UserProfile {
                id,
                nickname: nickname.to_string(),
                avatar: avatar.map(str::to_string),
                created_at: parse_timestamp(&format_timestamp(now)).unwrap_or(now),
            }),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AppError::Conflict {
                    message: "Email already exists".to_string(),
                    details: None,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Look up sign-in credentials by email.
    pub async fn find_credentials(&self, email: &str) -> Result<Option<Credentials>, AppError> {
        let row = sqlx::query("SELECT id, email, password_hash FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Credentials {
            user_id: row.get("id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
        }))
    }

    /// Email of a user.
    pub async fn get_user_email(&self, id: &str) -> Result<Option<String>, AppError> {
        let row = sqlx::query("SELECT email FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| row.get("email")))
    }

    /// List all user profiles.
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, AppError> {
        let rows = sqlx::query("SELECT id, nickname, avatar, created_at FROM users ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(user_from_row).collect()
    }

    /// Get a user profile by ID.
    pub async fn get_user(&self, id: &str) -> Result<Option<UserProfile>, AppError> {
        let row = sqlx::query("SELECT id, nickname, avatar, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    // ==================== TOKEN OPERATIONS ====================

    /// Store a token.
    pub async fn insert_token(&self, token: &TokenRecord) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO tokens (id, secret, user_id, kind, expires_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&token.id)
        .bind(&token.secret)
        .bind(&token.user_id)
        .bind(token.kind.as_str())
        .bind(format_timestamp(token.expires_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get a token by its public ID part.
    pub async fn get_token(&self, id: &str) -> Result<Option<TokenRecord>, AppError> {
        let row = sqlx::query("SELECT id, secret, user_id, kind, expires_at FROM tokens WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind: String = row.get("kind");
        let expires_at: String = row.get("expires_at");
        let (Some(kind), Some(expires_at)) =
            (TokenKind::from_str(&kind), parse_timestamp(&expires_at))
        else {
            return Err(AppError::Database(format!(
                "Malformed token row {}",
                row.get::<String, _>("id")
            )));
        };

        Ok(Some(TokenRecord {
            id: row.get("id"),
            secret: row.get("secret"),
            user_id: row.get("user_id"),
            kind,
            expires_at,
        }))
    }

    /// Delete one token. Returns whether it existed.
    pub async fn revoke_token(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every token of a user. Returns the number removed.
    pub async fn revoke_tokens(&self, user_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop tokens that expired before `now`.
    pub async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM tokens WHERE expires_at < ?")
            .bind(format_timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // ==================== POST OPERATIONS ====================

    /// Create a new post. The server assigns the ID and the creation time.
    pub async fn create_post(&self, request: &CreatePostRequest) -> Result<Post, AppError> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = format_timestamp(Utc::now());

        sqlx::query(
            "INSERT INTO posts (id, title, content, image_url, author_id, plant_name, created_at, like_count) VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&id)
        .bind(request.title.trim())
        .bind(&request.content)
        .bind(&request.image_url)
        .bind(&request.author_id)
        .bind(&request.plant_name)
        .bind(&created_at)
        .execute(&self.pool)
        .await?;

        self.get_post(&id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("Post {} vanished after insert", id)))
    }

    /// Get a post by ID.
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>, AppError> {
        let row = sqlx::query(
            "SELECT id, title, content, image_url, author_id, plant_name, created_at, like_count FROM posts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(post_from_row).transpose()
    }

    /// List one page of posts, newest first, strictly after the `start_after` post.
    pub async fn list_posts(
        &self,
        limit: u32,
        start_after: Option<&str>,
    ) -> Result<Vec<Post>, AppError> {
        let rows = match start_after {
            None => {
                sqlx::query(
                    "SELECT id, title, content, image_url, author_id, plant_name, created_at, like_count FROM posts ORDER BY created_at DESC, id DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            Some(cursor) => {
                let anchor = sqlx::query("SELECT created_at FROM posts WHERE id = ?")
                    .bind(cursor)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| AppError::Validation(format!("Unknown cursor {}", cursor)))?;
                let anchor_created_at: String = anchor.get("created_at");

                sqlx::query(
                    "SELECT id, title, content, image_url, author_id, plant_name, created_at, like_count FROM posts WHERE created_at < ?1 OR (created_at = ?1 AND id < ?2) ORDER BY created_at DESC, id DESC LIMIT ?3",
                )
                .bind(&anchor_created_at)
                .bind(cursor)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(post_from_row).collect()
    }

    /// List all posts of one author, newest first.
    pub async fn list_posts_by_author(&self, author_id: &str) -> Result<Vec<Post>, AppError> {
        let rows = sqlx::query(
            "SELECT id, title, content, image_url, author_id, plant_name, created_at, like_count FROM posts WHERE author_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(post_from_row).collect()
    }

    /// Increment the like counter and return the new value.
    pub async fn like_post(&self, id: &str) -> Result<i64, AppError> {
        let row = sqlx::query(
            "UPDATE posts SET like_count = like_count + 1 WHERE id = ? RETURNING like_count",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.get("like_count"))
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))
    }
}

fn user_from_row(row: &SqliteRow) -> Result<UserProfile, AppError> {
    let created_at: String = row.get("created_at");
    Ok(UserProfile {
        id: row.get("id"),
        nickname: row.get("nickname"),
        avatar: row.get("avatar"),
        created_at: parse_timestamp(&created_at)
            .ok_or_else(|| AppError::Database(format!("Malformed timestamp {}", created_at)))?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post, AppError> {
    let created_at: String = row.get("created_at");
    Ok(Post {
        id: row.get("id"),
        title: row.get("title"),
        content: row.get("content"),
        image_url: row.get("image_url"),
        author_id: row.get("author_id"),
        plant_name: row.get("plant_name"),
        created_at: parse_timestamp(&created_at)
            .ok_or_else(|| AppError::Database(format!("Malformed timestamp {}", created_at)))?,
        like_count: row.get("like_count"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use tempfile::TempDir;

    async fn repo() -> (Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("test.sqlite"))
            .await
            .expect("Failed to init DB");
        (Repository::new(pool), temp_dir)
    }

    fn post_request(title: &str, author: &str) -> CreatePostRequest {
        CreatePostRequest {
            title: title.to_string(),
            content: None,
            image_url: Some("http://x/img.jpg".to_string()),
            author_id: author.to_string(),
            plant_name: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let (repo, _dir) = repo().await;
        repo.create_user("a@example.com", "hash", "alice", None)
            .await
            .unwrap();
        let err = repo
            .create_user("a@example.com", "hash", "alice2", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_list_posts_pages_without_gaps_or_duplicates() {
        let (repo, _dir) = repo().await;
        let mut created = Vec::new();
        for i in 0..7 {
            created.push(repo.create_post(&post_request(&format!("p{}", i), "u1")).await.unwrap());
        }

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = repo.list_posts(3, cursor.as_deref()).await.unwrap();
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|p| p.id.clone());
            seen.extend(page);
        }

        assert_eq!(seen.len(), 7);
        let mut ids: Vec<_> = seen.iter().map(|p| p.id.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 7);
        for pair in seen.windows(2) {
            assert!(
                (pair[0].created_at, &pair[0].id) > (pair[1].created_at, &pair[1].id),
                "feed must be newest first"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_cursor_is_validation_error() {
        let (repo, _dir) = repo().await;
        let err = repo.list_posts(10, Some("missing")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_like_post_increments() {
        let (repo, _dir) = repo().await;
        let post = repo.create_post(&post_request("mint", "u1")).await.unwrap();
        assert_eq!(post.like_count, 0);
        assert_eq!(repo.like_post(&post.id).await.unwrap(), 1);
        assert_eq!(repo.like_post(&post.id).await.unwrap(), 2);
        assert!(matches!(
            repo.like_post("nope").await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_posts_by_author_filters() {
        let (repo, _dir) = repo().await;
        repo.create_post(&post_request("a1", "alice")).await.unwrap();
        repo.create_post(&post_request("b1", "bob")).await.unwrap();
        repo.create_post(&post_request("a2", "alice")).await.unwrap();

        let alice = repo.list_posts_by_author("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        assert!(alice.iter().all(|p| p.author_id == "alice"));
        assert!(alice[0].created_at >= alice[1].created_at);
    }

    #[tokio::test]
    async fn test_tokens_revoked_per_user() {
        let (repo, _dir) = repo().await;
        let token = TokenRecord {
            id: "t1".into(),
            secret: "s1".into(),
            user_id: "u1".into(),
            kind: TokenKind::Refresh,
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        repo.insert_token(&token).await.unwrap();
        let stored = repo.get_token("t1").await.unwrap().unwrap();
        assert_eq!(stored.kind, TokenKind::Refresh);
        assert_eq!(stored.secret, "s1");

        assert_eq!(repo.revoke_tokens("u1").await.unwrap(), 1);
        assert!(repo.get_token("t1").await.unwrap().is_none());
    }
}
