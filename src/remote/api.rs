//! Backend API client.

use std::sync::Arc;

use async_trait::async_trait;

use super::Transport;
use crate::app::PostActions;
use crate::errors::ClientError;
use crate::feed::{PageQuery, PostSource};
use crate::lookup::ProfileSource;
use crate::models::{
    AnalyzeRequest, CreatePostRequest, LikeResponse, ListPostsQuery, PlantAnalysis, Post,
    UserProfile,
};
use crate::session::IdentityProvider;
use crate::submit::{AnalysisService, PostWriter};

/// REST client for posts, users and analysis.
///
/// Reads use a cached bearer token from the identity provider; the write
/// seams take the token from the caller, which decides when to force a refresh.
pub struct ApiClient {
    transport: Transport,
    identity: Arc<dyn IdentityProvider>,
}

impl ApiClient {
    pub fn new(transport: Transport, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            transport,
            identity,
        }
    }

    async fn bearer(&self) -> Result<String, ClientError> {
        self.identity.id_token(false).await
    }

    /// GET /posts
    pub async fn list_posts(&self, query: &PageQuery) -> Result<Vec<Post>, ClientError> {
        let bearer = self.bearer().await?;
        let query = ListPostsQuery {
            limit: Some(query.limit as u32),
            start_after: query.start_after.as_ref().map(|c| c.0.clone()),
        };
        let response = self
            .transport
            .get(&["posts"], Some(bearer.as_str()))?
            .query(&query)
            .send()
            .await?;
        Ok(super::decode(response).await?)
    }

    /// GET /posts/{id}
    pub async fn get_post(&self, id: &str) -> Result<Post, ClientError> {
        let bearer = self.bearer().await?;
        self.transport
            .get_json(&["posts", id], Some(bearer.as_str()))
            .await
    }

    /// POST /posts/{id}/like
    pub async fn like(&self, id: &str) -> Result<LikeResponse, ClientError> {
        let bearer = self.bearer().await?;
        let response = self
            .transport
            .post(&["posts", id, "like"], Some(bearer.as_str()))?
            .send()
            .await?;
        Ok(super::decode(response).await?)
    }

    /// GET /users/{uid}/posts
    pub async fn list_user_posts(&self, uid: &str) -> Result<Vec<Post>, ClientError> {
        let bearer = self.bearer().await?;
        self.transport
            .get_json(&["users", uid, "posts"], Some(bearer.as_str()))
            .await
    }

    /// GET /users
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ClientError> {
        let bearer = self.bearer().await?;
        self.transport.get_json(&["users"], Some(bearer.as_str())).await
    }
}

#[async_trait]
impl PostSource for ApiClient {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Post>, ClientError> {
        self.list_posts(query).await
    }
}

#[async_trait]
impl ProfileSource for ApiClient {
    async fn fetch_profiles(&self) -> Result<Vec<UserProfile>, ClientError> {
        self.list_users().await
    }
}

#[async_trait]
impl PostWriter for ApiClient {
    async fn create_post(
        &self,
        request: &CreatePostRequest,
        bearer: &str,
    ) -> Result<Post, ClientError> {
        self.transport.post_json(&["posts"], request, Some(bearer)).await
    }
}

#[async_trait]
impl AnalysisService for ApiClient {
    async fn analyze(&self, image_url: &str, bearer: &str) -> Result<PlantAnalysis, ClientError> {
        let request = AnalyzeRequest {
            image_url: image_url.to_string(),
        };
        self.transport
            .post_json(&["analyze_plant_image"], &request, Some(bearer))
            .await
    }
}

#[async_trait]
impl PostActions for ApiClient {
    async fn like_post(&self, post_id: &str) -> Result<i64, ClientError> {
        Ok(self.like(post_id).await?.like_count)
    }

    async fn posts_by_author(&self, uid: &str) -> Result<Vec<Post>, ClientError> {
        self.list_user_posts(uid).await
    }
}
