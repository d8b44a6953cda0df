//! Post model: one user-submitted plant discovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A plant-discovery post, newest first in the feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub author_id: String,
    /// Filled in from the analysis step, absent when analysis failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant_name: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub like_count: i64,
}

impl Post {
    /// Cursor that resumes the feed after this post.
    pub fn cursor(&self) -> Cursor {
        Cursor(self.id.clone())
    }
}

/// Opaque position marker: the id of the last post of a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Request body for creating a new post.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(alias = "user_id")]
    pub author_id: String,
    #[serde(default)]
    pub plant_name: Option<String>,
}

/// Query string of `GET /posts`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPostsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_after: Option<String>,
}

/// Response of `POST /posts/{id}/like`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub id: String,
    pub like_count: i64,
}
