//! Paginated feed loader.
//!
//! Posts are fetched newest first, one page per `load` call. The loader keeps
//! the cursor of the last fetched post and a `has_more` heuristic: a full page
//! means there may be more. When the collection size is an exact multiple of
//! the page size, one extra load returns zero posts and flips `has_more` off.
//!
//! Every call takes a [`Ticket`]. Only the newest call may apply its page, so
//! overlapping loads and responses arriving after [`FeedLoader::clear`] are
//! dropped without touching state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::ClientError;
use crate::models::{Cursor, Post};
use crate::request::{Generation, RequestScope, Ticket};

/// One paginated query against the post collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub start_after: Option<Cursor>,
}

/// Remote post collection ordered by creation time, newest first.
#[async_trait]
pub trait PostSource: Send + Sync + 'static {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Post>, ClientError>;
}

/// Observable feed state.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub cursor: Option<Cursor>,
    pub has_more: bool,
    pub loading: bool,
    pub error: Option<ClientError>,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            posts: Vec::new(),
            cursor: None,
            has_more: true,
            loading: false,
            error: None,
        }
    }
}

/// Result of a `load` call that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was applied to the state.
    Applied { fetched: usize },
    /// A newer load or a clear happened while this one was in flight.
    Superseded,
}

/// Cursor-paginated loader over a [`PostSource`].
pub struct FeedLoader {
    source: Arc<dyn PostSource>,
    page_size: usize,
    timeout: Duration,
    generation: Generation,
    state: watch::Sender<FeedState>,
}

impl FeedLoader {
    pub fn new(source: Arc<dyn PostSource>, page_size: usize, timeout: Duration) -> Self {
        let (state, _) = watch::channel(FeedState::default());
        Self {
            source,
            page_size: page_size.max(1),
            timeout,
            generation: Generation::new(),
            state,
        }
    }

    /// Subscribe to state changes.
    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> FeedState {
        self.state.borrow().clone()
    }

    /// Fetch one page. `reset` queries from the top and replaces the list;
    /// otherwise the page is appended after the stored cursor.
    pub async fn load(&self, reset: bool) -> Result<LoadOutcome, ClientError> {
        let ticket = self.generation.begin();

        let start_after = {
            let mut start_after = None;
            self.state.send_modify(|state| {
                state.loading = true;
                state.error = None;
                if !reset {
                    start_after = state.cursor.clone();
                }
            });
            start_after
        };

        let query = PageQuery {
            limit: self.page_size,
            start_after,
        };
        let scope = RequestScope::new(self.timeout);
        let result = scope.run(self.source.fetch_page(&query)).await;

        self.finish(ticket, reset, result)
    }

    fn finish(
        &self,
        ticket: Ticket,
        reset: bool,
        result: Result<Vec<Post>, ClientError>,
    ) -> Result<LoadOutcome, ClientError> {
        if !self.generation.is_current(ticket) {
            tracing::debug!("Discarding superseded feed response");
            return match result {
                Ok(_) => Ok(LoadOutcome::Superseded),
                Err(e) => Err(e),
            };
        }

        match result {
            Ok(page) => {
                let fetched = page.len();
                self.state.send_modify(|state| {
                    if let Some(last) = page.last() {
                        state.cursor = Some(last.cursor());
                    } else if reset {
                        state.cursor = None;
                    }
                    state.has_more = fetched == self.page_size;
                    if reset {
                        state.posts = page;
                    } else {
                        state.posts.extend(page);
                    }
                    state.loading = false;
                    state.error = None;
                });
                Ok(LoadOutcome::Applied { fetched })
            }
            Err(e) => {
                tracing::warn!("Feed load failed: {}", e);
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Drop everything and supersede in-flight loads.
    pub fn clear(&self) {
        self.generation.invalidate();
        self.state.send_replace(FeedState::default());
    }

    /// Adjust a post's like count locally. Returns the new count, if the post is loaded.
    pub fn bump_like(&self, post_id: &str, delta: i64) -> Option<i64> {
        let mut updated = None;
        self.state.send_if_modified(|state| {
            match state.posts.iter_mut().find(|p| p.id == post_id) {
                Some(post) => {
                    post.like_count = (post.like_count + delta).max(0);
                    updated = Some(post.like_count);
                    true
                }
                None => false,
            }
        });
        updated
    }

    /// Overwrite a post's like count with the authoritative value.
    pub fn set_like_count(&self, post_id: &str, like_count: i64) {
        self.state.send_if_modified(|state| {
            match state.posts.iter_mut().find(|p| p.id == post_id) {
                Some(post) if post.like_count != like_count => {
                    post.like_count = like_count.max(0);
                    true
                }
                _ => false,
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use parking_lot::Mutex;

    pub fn post(index: usize) -> Post {
        Post {
            id: format!("post-{:03}", index),
            title: format!("Herb #{}", index),
            content: None,
            image_url: None,
            author_id: "u1".to_string(),
            plant_name: None,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + ChronoDuration::minutes(index as i64),
            like_count: 0,
        }
    }

    /// In-memory collection honouring `limit` and `start_after`.
    #[derive(Default)]
    pub struct MemorySource {
        pub posts: Mutex<Vec<Post>>,
        pub queries: Mutex<Vec<PageQuery>>,
        pub fail_with: Mutex<Option<ClientError>>,
        pub delay: Mutex<Option<Duration>>,
    }

    impl MemorySource {
        pub fn with_posts(count: usize) -> Self {
            let source = Self::default();
            for i in 0..count {
                source.insert(post(i));
            }
            source
        }

        /// Insert keeping newest-first order.
        pub fn insert(&self, post: Post) {
            let mut posts = self.posts.lock();
            posts.push(post);
            posts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        }
    }

    #[async_trait]
    impl PostSource for MemorySource {
        async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<Post>, ClientError> {
            self.queries.lock().push(query.clone());
            let delay = *self.delay.lock();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(err) = self.fail_with.lock().clone() {
                return Err(err);
            }

            let posts = self.posts.lock();
            let start = match &query.start_after {
                Some(cursor) => posts
                    .iter()
                    .position(|p| p.id == cursor.0)
                    .map(|i| i + 1)
                    .ok_or_else(|| ClientError::Validation("unknown cursor".into()))?,
                None => 0,
            };
            Ok(posts.iter().skip(start).take(query.limit).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{post, MemorySource};
    use super::*;
    use std::collections::HashSet;

    fn loader(source: &Arc<MemorySource>, page_size: usize) -> FeedLoader {
        FeedLoader::new(source.clone(), page_size, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_initial_state() {
        let source = Arc::new(MemorySource::default());
        let state = loader(&source, 10).snapshot();
        assert!(state.posts.is_empty());
        assert!(state.cursor.is_none());
        assert!(state.has_more);
        assert!(!state.loading);
        assert!(state.error.is_none());
    }

    #[tokio::test]
    async fn test_pages_concatenate_without_duplicates() {
        let source = Arc::new(MemorySource::with_posts(25));
        let feed = loader(&source, 10);

        let mut fetched_pages: Vec<Post> = Vec::new();
        assert_eq!(
            feed.load(true).await.unwrap(),
            LoadOutcome::Applied { fetched: 10 }
        );
        fetched_pages.extend(feed.snapshot().posts);
        while feed.snapshot().has_more {
            let before = feed.snapshot().posts.len();
            feed.load(false).await.unwrap();
            fetched_pages.extend(feed.snapshot().posts[before..].iter().cloned());
        }

        let state = feed.snapshot();
        assert_eq!(state.posts.len(), 25);
        assert_eq!(state.posts, fetched_pages);
        let ids: HashSet<_> = state.posts.iter().map(|p| p.id.clone()).collect();
        assert_eq!(ids.len(), 25);
        assert_eq!(state.posts, *source.posts.lock());
        assert!(!state.has_more);
    }

    #[tokio::test]
    async fn test_exact_multiple_needs_one_empty_load() {
        let source = Arc::new(MemorySource::with_posts(10));
        let feed = loader(&source, 10);

        assert_eq!(
            feed.load(true).await.unwrap(),
            LoadOutcome::Applied { fetched: 10 }
        );
        assert!(feed.snapshot().has_more);

        assert_eq!(
            feed.load(false).await.unwrap(),
            LoadOutcome::Applied { fetched: 0 }
        );
        let state = feed.snapshot();
        assert!(!state.has_more);
        assert_eq!(state.posts.len(), 10);
        assert_eq!(state.cursor, Some(state.posts[9].cursor()));
    }

    #[tokio::test]
    async fn test_has_more_tracks_last_page_size() {
        let source = Arc::new(MemorySource::with_posts(4));
        let feed = loader(&source, 3);

        feed.load(true).await.unwrap();
        assert!(feed.snapshot().has_more);
        feed.load(false).await.unwrap();
        assert!(!feed.snapshot().has_more);
        assert_eq!(feed.snapshot().posts.len(), 4);
    }

    #[tokio::test]
    async fn test_reset_replaces_list_and_queries_without_cursor() {
        let source = Arc::new(MemorySource::with_posts(30));
        let feed = loader(&source, 10);
        feed.load(true).await.unwrap();
        feed.load(false).await.unwrap();
        feed.load(false).await.unwrap();
        assert_eq!(feed.snapshot().posts.len(), 30);

        source.insert(post(99));
        feed.load(true).await.unwrap();

        let last_query = source.queries.lock().last().cloned().unwrap();
        assert_eq!(last_query.start_after, None);
        let state = feed.snapshot();
        assert_eq!(state.posts.len(), 10);
        assert_eq!(state.posts[0].id, "post-099");
        assert_eq!(state.cursor, Some(state.posts[9].cursor()));
    }

    #[tokio::test]
    async fn test_failure_leaves_state_untouched() {
        let source = Arc::new(MemorySource::with_posts(15));
        let feed = loader(&source, 10);
        feed.load(true).await.unwrap();
        let before = feed.snapshot();

        *source.fail_with.lock() = Some(ClientError::PermissionDenied("rules".into()));
        let err = feed.load(false).await.unwrap_err();
        assert!(matches!(err, ClientError::PermissionDenied(_)));

        let after = feed.snapshot();
        assert_eq!(after.posts, before.posts);
        assert_eq!(after.cursor, before.cursor);
        assert_eq!(after.has_more, before.has_more);
        assert!(!after.loading);
        assert_eq!(after.error, Some(err));

        // A later success clears the error
        *source.fail_with.lock() = None;
        feed.load(false).await.unwrap();
        assert!(feed.snapshot().error.is_none());
        assert_eq!(feed.snapshot().posts.len(), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out() {
        let source = Arc::new(MemorySource::with_posts(5));
        *source.delay.lock() = Some(Duration::from_secs(30));
        let feed = loader(&source, 10);

        let err = feed.load(true).await.unwrap_err();
        assert_eq!(err, ClientError::Timeout(Duration::from_secs(5)));
        assert!(feed.snapshot().posts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_load_supersedes_older() {
        let source = Arc::new(MemorySource::with_posts(20));
        *source.delay.lock() = Some(Duration::from_millis(100));
        let feed = loader(&source, 10);

        let (first, second) = tokio::join!(feed.load(true), feed.load(true));
        assert_eq!(first.unwrap(), LoadOutcome::Superseded);
        assert_eq!(second.unwrap(), LoadOutcome::Applied { fetched: 10 });
        assert_eq!(feed.snapshot().posts.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_after_clear_is_ignored() {
        let source = Arc::new(MemorySource::with_posts(5));
        *source.delay.lock() = Some(Duration::from_millis(100));
        let feed = loader(&source, 10);

        let load = feed.load(true);
        let clear = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            feed.clear();
        };
        let (outcome, ()) = tokio::join!(load, clear);
        assert_eq!(outcome.unwrap(), LoadOutcome::Superseded);
        assert_eq!(feed.snapshot(), FeedState::default());
    }

    #[tokio::test]
    async fn test_bump_like_is_local_and_clamped() {
        let source = Arc::new(MemorySource::with_posts(3));
        let feed = loader(&source, 10);
        feed.load(true).await.unwrap();

        let id = feed.snapshot().posts[0].id.clone();
        assert_eq!(feed.bump_like(&id, 1), Some(1));
        assert_eq!(feed.bump_like(&id, -5), Some(0));
        assert_eq!(feed.bump_like("missing", 1), None);
        feed.set_like_count(&id, 7);
        assert_eq!(feed.snapshot().posts[0].like_count, 7);
        assert_eq!(source.queries.lock().len(), 1);
    }
}
