//! Session tracking.
//!
//! The identity provider pushes `Option<Identity>` notifications; a
//! [`SessionTracker`] is the single writer of the resulting [`SessionState`] and
//! hands out read-only [`SessionHandle`]s to every dependent component.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::errors::ClientError;
use crate::models::Identity;

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// Register for change notifications. The current state, once resolved, is
    /// delivered as the first notification. Dropping the receiver deregisters.
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ClientError>;

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<Identity, ClientError>;

    async fn sign_out(&self) -> Result<(), ClientError>;

    /// Short-lived bearer credential for the signed-in identity.
    async fn id_token(&self, force_refresh: bool) -> Result<String, ClientError>;
}

/// Fan-out of identity notifications to every live subscriber.
///
/// Providers embed one of these. Until the first `publish`, subscribers receive
/// nothing, which keeps trackers in the not-ready state.
#[derive(Debug, Default)]
pub struct IdentityBroadcaster {
    inner: Mutex<BroadcastState>,
}

#[derive(Debug, Default)]
struct BroadcastState {
    current: Option<Option<Identity>>,
    subscribers: Vec<mpsc::UnboundedSender<Option<Identity>>>,
}

impl IdentityBroadcaster {
    /// Broadcaster with no resolved state yet.
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Broadcaster already resolved to `identity`.
    pub fn resolved(identity: Option<Identity>) -> Self {
        Self {
            inner: Mutex::new(BroadcastState {
                current: Some(identity),
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if let Some(current) = &inner.current {
            let _ = tx.send(current.clone());
        }
        inner.subscribers.push(tx);
        rx
    }

    /// Deliver a notification and drop subscribers that went away.
    pub fn publish(&self, identity: Option<Identity>) {
        let mut inner = self.inner.lock();
        inner.current = Some(identity.clone());
        inner
            .subscribers
            .retain(|tx| tx.send(identity.clone()).is_ok());
    }

    pub fn current(&self) -> Option<Identity> {
        self.inner.lock().current.clone().flatten()
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        inner.subscribers.len()
    }
}

/// Observed session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub identity: Option<Identity>,
    /// True once the provider delivered its first notification
    pub ready: bool,
}

impl SessionState {
    /// Apply one provider notification.
    pub fn apply(&mut self, identity: Option<Identity>) {
        self.identity = identity;
        self.ready = true;
    }
}

/// Read-only view of the session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn current_identity(&self) -> Option<Identity> {
        self.rx.borrow().identity.clone()
    }

    pub fn ready(&self) -> bool {
        self.rx.borrow().ready
    }

    pub fn snapshot(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Wait for the next notification. Errors once the tracker is gone.
    pub async fn changed(&mut self) -> Result<SessionState, ClientError> {
        self.rx.changed().await.map_err(|_| ClientError::Cancelled)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Wait until the first identity resolution.
    pub async fn wait_ready(&mut self) -> Result<SessionState, ClientError> {
        let state = self
            .rx
            .wait_for(|state| state.ready)
            .await
            .map_err(|_| ClientError::Cancelled)?;
        Ok(state.clone())
    }

    /// Wait until the tracker has seen `uid` signed in, or a sign-out for `None`.
    pub async fn wait_for_identity(
        &mut self,
        uid: Option<&str>,
    ) -> Result<SessionState, ClientError> {
        let state = self
            .rx
            .wait_for(|state| {
                state.ready && state.identity.as_ref().map(|i| i.uid.as_str()) == uid
            })
            .await
            .map_err(|_| ClientError::Cancelled)?;
        Ok(state.clone())
    }
}

/// Single writer of the session state.
///
/// Dropping the tracker stops the notification pump, which drops the provider
/// subscription.
pub struct SessionTracker {
    rx: watch::Receiver<SessionState>,
    pump: JoinHandle<()>,
}

impl SessionTracker {
    /// Subscribe to `provider` and start mirroring its notifications.
    pub fn start(provider: &dyn IdentityProvider) -> Self {
        let mut notifications = provider.subscribe();
        let (tx, rx) = watch::channel(SessionState::default());

        let pump = tokio::spawn(async move {
            while let Some(identity) = notifications.recv().await {
                tracing::debug!(
                    "Session notification: {}",
                    identity.as_ref().map(|i| i.uid.as_str()).unwrap_or("signed out")
                );
                tx.send_modify(|state| state.apply(identity));
            }
        });

        Self { rx, pump }
    }

    /// New reader; `changed()` on it waits for the next notification.
    pub fn handle(&self) -> SessionHandle {
        let mut rx = self.rx.clone();
        rx.borrow_and_update();
        SessionHandle { rx }
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.rx.borrow().identity.clone()
    }

    pub fn ready(&self) -> bool {
        self.rx.borrow().ready
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory provider driven by the test.
    #[derive(Default)]
    pub struct FakeProvider {
        pub broadcaster: IdentityBroadcaster,
        pub token_calls: AtomicUsize,
        pub fail_tokens: std::sync::atomic::AtomicBool,
    }

    impl FakeProvider {
        pub fn signed_in(uid: &str) -> Self {
            Self {
                broadcaster: IdentityBroadcaster::resolved(Some(identity(uid))),
                ..Self::default()
            }
        }
    }

    pub fn identity(uid: &str) -> Identity {
        Identity {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
        }
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
            self.broadcaster.subscribe()
        }

        async fn sign_in(&self, email: &str, _password: &str) -> Result<Identity, ClientError> {
            let uid = email.split('@').next().unwrap_or(email);
            let identity = identity(uid);
            self.broadcaster.publish(Some(identity.clone()));
            Ok(identity)
        }

        async fn sign_up(
            &self,
            email: &str,
            password: &str,
            _nickname: &str,
        ) -> Result<Identity, ClientError> {
            self.sign_in(email, password).await
        }

        async fn sign_out(&self) -> Result<(), ClientError> {
            self.broadcaster.publish(None);
            Ok(())
        }

        async fn id_token(&self, _force_refresh: bool) -> Result<String, ClientError> {
            self.token_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_tokens.load(Ordering::SeqCst) {
                return Err(ClientError::PermissionDenied("token revoked".into()));
            }
            match self.broadcaster.current() {
                Some(identity) => Ok(format!("token-for-{}", identity.uid)),
                None => Err(ClientError::PermissionDenied("signed out".into())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{identity, FakeProvider};
    use super::*;

    #[test]
    fn test_apply_sets_ready_even_for_signed_out() {
        let mut state = SessionState::default();
        assert!(!state.ready);
        state.apply(None);
        assert!(state.ready);
        assert_eq!(state.identity, None);
    }

    #[tokio::test]
    async fn test_not_ready_until_first_notification() {
        let provider = FakeProvider::default();
        let tracker = SessionTracker::start(&provider);
        tokio::task::yield_now().await;
        assert!(!tracker.ready());

        let mut handle = tracker.handle();
        provider.broadcaster.publish(None);
        let state = handle.wait_ready().await.unwrap();
        assert!(state.ready);
        assert_eq!(state.identity, None);
    }

    #[tokio::test]
    async fn test_ready_flips_once_and_identity_is_replaced() {
        let provider = FakeProvider::default();
        let tracker = SessionTracker::start(&provider);
        let mut handle = tracker.handle();

        let sequence = [
            Some(identity("a")),
            None,
            Some(identity("b")),
            Some(identity("b")),
            None,
        ];
        let mut ready_transitions = 0;
        let mut was_ready = handle.ready();
        for value in sequence {
            provider.broadcaster.publish(value.clone());
            let state = handle.changed().await.unwrap();
            if state.ready && !was_ready {
                ready_transitions += 1;
            }
            was_ready = state.ready;
            assert!(state.ready);
            assert_eq!(state.identity, value);
        }
        assert_eq!(ready_transitions, 1);
    }

    #[tokio::test]
    async fn test_resolved_provider_delivers_current_state() {
        let provider = FakeProvider::signed_in("fern");
        let tracker = SessionTracker::start(&provider);
        let state = tracker.handle().wait_ready().await.unwrap();
        assert_eq!(state.identity.unwrap().uid, "fern");
    }

    #[tokio::test]
    async fn test_wait_for_identity_matches_uid() {
        let provider = FakeProvider::default();
        let tracker = SessionTracker::start(&provider);
        let mut handle = tracker.handle();

        provider.broadcaster.publish(Some(identity("fern")));
        // Published but not yet pumped into the tracker
        assert_eq!(tracker.current_identity(), None);
        let state = handle.wait_for_identity(Some("fern")).await.unwrap();
        assert_eq!(state.identity.unwrap().uid, "fern");
        assert_eq!(tracker.current_identity().unwrap().uid, "fern");

        provider.broadcaster.publish(Some(identity("moss")));
        provider.broadcaster.publish(None);
        let state = handle.wait_for_identity(None).await.unwrap();
        assert!(state.ready);
        assert_eq!(tracker.current_identity(), None);
    }

    #[tokio::test]
    async fn test_drop_deregisters_listener() {
        let provider = FakeProvider::signed_in("fern");
        let tracker = SessionTracker::start(&provider);
        tracker.handle().wait_ready().await.unwrap();
        assert_eq!(provider.broadcaster.subscriber_count(), 1);

        let mut handle = tracker.handle();
        drop(tracker);
        // The aborted pump drops its receiver on the next poll
        assert!(handle.changed().await.is_err());
        assert_eq!(provider.broadcaster.subscriber_count(), 0);

        // Late notifications are harmless
        provider.broadcaster.publish(None);
    }
}
