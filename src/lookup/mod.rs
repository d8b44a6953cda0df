//! User index loader.
//!
//! Fetches the whole user collection in one request and keeps it as a map from
//! identity id to profile. The collection is small, so there is no pagination.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::errors::ClientError;
use crate::feed::LoadOutcome;
use crate::models::UserProfile;
use crate::request::{Generation, RequestScope};

/// Label shown for authors missing from the index.
pub const UNKNOWN_NICKNAME: &str = "Unknown";

/// Remote user collection.
#[async_trait]
pub trait ProfileSource: Send + Sync + 'static {
    async fn fetch_profiles(&self) -> Result<Vec<UserProfile>, ClientError>;
}

/// Profiles keyed by identity id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserIndex {
    profiles: HashMap<String, UserProfile>,
}

impl UserIndex {
    pub fn from_profiles(profiles: Vec<UserProfile>) -> Self {
        Self {
            profiles: profiles.into_iter().map(|p| (p.id.clone(), p)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&UserProfile> {
        self.profiles.get(id)
    }

    /// Nickname of `id`, or [`UNKNOWN_NICKNAME`].
    pub fn nickname(&self, id: &str) -> &str {
        self.profiles
            .get(id)
            .map(|p| p.nickname.as_str())
            .unwrap_or(UNKNOWN_NICKNAME)
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

/// Observable index state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserIndexState {
    pub index: UserIndex,
    pub loading: bool,
    pub error: Option<ClientError>,
}

/// Whole-collection loader over a [`ProfileSource`].
pub struct UserIndexLoader {
    source: Arc<dyn ProfileSource>,
    timeout: Duration,
    generation: Generation,
    state: watch::Sender<UserIndexState>,
}

impl UserIndexLoader {
    pub fn new(source: Arc<dyn ProfileSource>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(UserIndexState::default());
        Self {
            source,
            timeout,
            generation: Generation::new(),
            state,
        }
    }

    pub fn watch(&self) -> watch::Receiver<UserIndexState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> UserIndexState {
        self.state.borrow().clone()
    }

    pub fn nickname(&self, id: &str) -> String {
        self.state.borrow().index.nickname(id).to_string()
    }

    /// Fetch every profile and replace the index wholesale.
    pub async fn load(&self) -> Result<LoadOutcome, ClientError> {
        let ticket = self.generation.begin();
        self.state.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });

        let scope = RequestScope::new(self.timeout);
        let result = scope.run(self.source.fetch_profiles()).await;

        if !self.generation.is_current(ticket) {
            tracing::debug!("Discarding superseded user index response");
            return result.map(|_| LoadOutcome::Superseded);
        }

        match result {
            Ok(profiles) => {
                let fetched = profiles.len();
                self.state.send_replace(UserIndexState {
                    index: UserIndex::from_profiles(profiles),
                    loading: false,
                    error: None,
                });
                Ok(LoadOutcome::Applied { fetched })
            }
            Err(e) => {
                tracing::warn!("User index load failed: {}", e);
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(e.clone());
                });
                Err(e)
            }
        }
    }

    /// Drop the index and supersede in-flight loads.
    pub fn clear(&self) {
        self.generation.invalidate();
        self.state.send_replace(UserIndexState::default());
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{profile, MemoryProfiles};
    use super::*;

    #[test]
    fn test_lookup_miss_uses_fallback() {
        let index = UserIndex::from_profiles(vec![profile("u1", "fern")]);
        assert_eq!(index.nickname("u1"), "fern");
        assert_eq!(index.nickname("ghost"), UNKNOWN_NICKNAME);
    }

    #[tokio::test]
    async fn test_load_replaces_wholesale() {
        let source = Arc::new(MemoryProfiles::default());
        *source.profiles.lock() = vec![profile("u1", "fern"), profile("u2", "moss")];
        let loader = UserIndexLoader::new(source.clone(), Duration::from_secs(5));

        assert_eq!(
            loader.load().await.unwrap(),
            LoadOutcome::Applied { fetched: 2 }
        );
        assert_eq!(loader.nickname("u2"), "moss");

        *source.profiles.lock() = vec![profile("u3", "sage")];
        loader.load().await.unwrap();
        let state = loader.snapshot();
        assert_eq!(state.index.len(), 1);
        assert_eq!(loader.nickname("u1"), UNKNOWN_NICKNAME);
        assert_eq!(loader.nickname("u3"), "sage");
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_index() {
        let source = Arc::new(MemoryProfiles::default());
        *source.profiles.lock() = vec![profile("u1", "fern")];
        let loader = UserIndexLoader::new(source.clone(), Duration::from_secs(5));
        loader.load().await.unwrap();

        *source.fail_with.lock() = Some(ClientError::Network("500".into()));
        assert!(loader.load().await.is_err());
        let state = loader.snapshot();
        assert_eq!(state.index.nickname("u1"), "fern");
        assert!(matches!(state.error, Some(ClientError::Network(_))));
        assert!(!state.loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported() {
        let source = Arc::new(MemoryProfiles::default());
        *source.delay.lock() = Some(Duration::from_secs(10));
        let loader = UserIndexLoader::new(source, Duration::from_secs(5));

        assert_eq!(
            loader.load().await.unwrap_err(),
            ClientError::Timeout(Duration::from_secs(5))
        );
    }

    #[tokio::test]
    async fn test_clear_resets() {
        let source = Arc::new(MemoryProfiles::default());
        *source.profiles.lock() = vec![profile("u1", "fern")];
        let loader = UserIndexLoader::new(source, Duration::from_secs(5));
        loader.load().await.unwrap();
        loader.clear();
        assert_eq!(loader.snapshot(), UserIndexState::default());
    }
}
