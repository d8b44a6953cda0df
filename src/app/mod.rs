//! Composition controller.
//!
//! [`HerbFinder`] wires the session tracker, the two loaders and the submission
//! pipeline together. The loaders follow the identity: a sign-in loads the user
//! index and the first feed page, a sign-out clears everything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::errors::ClientError;
use crate::feed::{FeedLoader, LoadOutcome, PostSource};
use crate::lookup::{ProfileSource, UserIndexLoader};
use crate::models::{Identity, Post};
use crate::remote::{ApiClient, HttpIdentityProvider, HttpObjectStore, Transport};
use crate::request::RequestScope;
use crate::session::{IdentityProvider, SessionHandle, SessionTracker};
use crate::submit::{
    AnalysisService, ObjectStore, PipelineTimeouts, PostWriter, Submission, SubmissionPipeline,
    SubmissionReport,
};

/// Post operations outside the feed: likes and per-author listing.
#[async_trait]
pub trait PostActions: Send + Sync + 'static {
    /// Increment the like counter and return the authoritative count.
    async fn like_post(&self, post_id: &str) -> Result<i64, ClientError>;

    async fn posts_by_author(&self, uid: &str) -> Result<Vec<Post>, ClientError>;
}

/// The external seams the controller runs against.
#[derive(Clone)]
pub struct Services {
    pub identity: Arc<dyn IdentityProvider>,
    pub posts: Arc<dyn PostSource>,
    pub profiles: Arc<dyn ProfileSource>,
    pub objects: Arc<dyn ObjectStore>,
    pub analysis: Arc<dyn AnalysisService>,
    pub writer: Arc<dyn PostWriter>,
    pub actions: Arc<dyn PostActions>,
}

impl Services {
    /// Every seam backed by the REST backend at `config.api_base_url`.
    pub fn http(config: &ClientConfig) -> Result<(Self, Arc<HttpIdentityProvider>), ClientError> {
        let transport = Transport::new(config)?;
        let identity = Arc::new(HttpIdentityProvider::new(transport.clone()));
        let api = Arc::new(ApiClient::new(transport.clone(), identity.clone()));
        let objects = Arc::new(HttpObjectStore::new(
            transport,
            config.upload_chunk_bytes,
            config.request_timeout,
        ));

        let services = Self {
            identity: identity.clone(),
            posts: api.clone(),
            profiles: api.clone(),
            objects,
            analysis: api.clone(),
            writer: api.clone(),
            actions: api,
        };
        Ok((services, identity))
    }
}

pub struct HerbFinder {
    services: Services,
    tracker: SessionTracker,
    feed: FeedLoader,
    users: UserIndexLoader,
    pipeline: SubmissionPipeline,
    request_timeout: Duration,
}

impl HerbFinder {
    /// Build the controller and start tracking the session. Must run inside a tokio runtime.
    pub fn new(services: Services, config: &ClientConfig) -> Self {
        let tracker = SessionTracker::start(services.identity.as_ref());
        let feed = FeedLoader::new(
            services.posts.clone(),
            config.page_size,
            config.request_timeout,
        );
        let users = UserIndexLoader::new(services.profiles.clone(), config.request_timeout);
        let pipeline = SubmissionPipeline::new(
            services.identity.clone(),
            services.objects.clone(),
            services.analysis.clone(),
            services.writer.clone(),
            PipelineTimeouts {
                // Whole-upload deadline; each chunk also has its own
                upload: config.request_timeout * 12,
                analysis: config.analysis_timeout,
                persist: config.request_timeout,
            },
        );

        Self {
            services,
            tracker,
            feed,
            users,
            pipeline,
            request_timeout: config.request_timeout,
        }
    }

    pub fn session(&self) -> SessionHandle {
        self.tracker.handle()
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.tracker.current_identity()
    }

    pub fn feed(&self) -> &FeedLoader {
        &self.feed
    }

    pub fn users(&self) -> &UserIndexLoader {
        &self.users
    }

    pub fn pipeline(&self) -> &SubmissionPipeline {
        &self.pipeline
    }

    /// Follow identity changes until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ClientError> {
        let mut session = self.tracker.handle();

        let state = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            state = session.wait_ready() => state?,
        };
        tracing::info!("Session ready");

        let mut identity = state.identity;
        loop {
            // A change abandons the loads started for the previous identity
            let follow = self.follow_identity(identity);
            tokio::pin!(follow);
            let mut followed = false;

            identity = loop {
                tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = &mut follow, if !followed => followed = true,
                    state = session.changed() => break state?.identity,
                }
            };
        }
    }

    async fn follow_identity(&self, identity: Option<Identity>) {
        match identity {
            Some(identity) => {
                tracing::debug!("Loading data for {}", identity.uid);
                let (users, feed) = tokio::join!(self.users.load(), self.feed.load(true));
                if let Err(e) = users {
                    tracing::warn!("User index unavailable: {}", e);
                }
                if let Err(e) = feed {
                    tracing::warn!("Feed unavailable: {}", e);
                }
            }
            None => self.reset(),
        }
    }

    /// Drop every list, lookup table, cursor and error state.
    pub fn reset(&self) {
        self.feed.clear();
        self.users.clear();
        self.pipeline.reset();
    }

    /// Sign in and return once the session reflects the new identity.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ClientError> {
        let identity = self.services.identity.sign_in(email, password).await?;
        self.settle(Some(&identity.uid)).await?;
        Ok(identity)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<Identity, ClientError> {
        let identity = self
            .services
            .identity
            .sign_up(email, password, nickname)
            .await?;
        self.settle(Some(&identity.uid)).await?;
        Ok(identity)
    }

    pub async fn sign_out(&self) -> Result<(), ClientError> {
        self.services.identity.sign_out().await?;
        self.settle(None).await
    }

    /// Wait for the tracker to observe `uid`, so reads right after a sign-in see it.
    async fn settle(&self, uid: Option<&str>) -> Result<(), ClientError> {
        let mut session = self.tracker.handle();
        RequestScope::new(self.request_timeout)
            .run(async { session.wait_for_identity(uid).await.map(|_| ()) })
            .await
    }

    /// Submit a post, then reload the feed from the top.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionReport, ClientError> {
        let identity = self.tracker.current_identity();
        let report = self.pipeline.submit(identity.as_ref(), submission).await?;

        if let Err(e) = self.feed.load(true).await {
            tracing::warn!("Feed reload after submission failed: {}", e);
        }
        Ok(report)
    }

    /// Next feed page. `None` when there is nothing more or a load is running.
    pub async fn load_more(&self) -> Result<Option<LoadOutcome>, ClientError> {
        let state = self.feed.snapshot();
        if !state.has_more || state.loading {
            return Ok(None);
        }
        self.feed.load(false).await.map(Some)
    }

    /// Optimistic like: bump locally, then reconcile or revert.
    pub async fn like(&self, post_id: &str) -> Result<i64, ClientError> {
        let bumped = self.feed.bump_like(post_id, 1);

        let result = RequestScope::new(self.request_timeout)
            .run(self.services.actions.like_post(post_id))
            .await;

        match result {
            Ok(like_count) => {
                self.feed.set_like_count(post_id, like_count);
                Ok(like_count)
            }
            Err(e) => {
                if bumped.is_some() {
                    self.feed.bump_like(post_id, -1);
                }
                tracing::warn!("Like of {} failed: {}", post_id, e);
                Err(e)
            }
        }
    }

    /// Posts of the signed-in user.
    pub async fn my_posts(&self) -> Result<Vec<Post>, ClientError> {
        let identity = self
            .tracker
            .current_identity()
            .ok_or_else(|| ClientError::Validation("Sign in to see your posts.".to_string()))?;

        RequestScope::new(self.request_timeout)
            .run(self.services.actions.posts_by_author(&identity.uid))
            .await
    }

    /// Nickname of a post's author, or the unknown-author label.
    pub fn author_nickname(&self, post: &Post) -> String {
        self.users.nickname(&post.author_id)
    }
}
