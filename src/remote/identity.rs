//! Identity provider backed by the `/auth` endpoints.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::Transport;
use crate::errors::ClientError;
use crate::models::{
    AuthSession, CreateUserRequest, CreateUserResponse, Identity, RefreshTokenRequest,
    SignInRequest,
};
use crate::session::{IdentityBroadcaster, IdentityProvider};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

struct StoredSession {
    session: AuthSession,
    expires_at: Instant,
}

impl StoredSession {
    fn new(session: AuthSession) -> Self {
        let expires_at = Instant::now() + Duration::from_secs(session.expires_in);
        Self {
            session,
            expires_at,
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

/// Email and password accounts with id and refresh tokens.
///
/// Starts unresolved: call [`restore`](Self::restore) with a saved refresh
/// token, or with `None`, to publish the initial state.
pub struct HttpIdentityProvider {
    transport: Transport,
    broadcaster: IdentityBroadcaster,
    session: Mutex<Option<StoredSession>>,
    /// Refresh tokens are single use, so exchanges run one at a time
    refresh: tokio::sync::Mutex<()>,
}

impl HttpIdentityProvider {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            broadcaster: IdentityBroadcaster::unresolved(),
            session: Mutex::new(None),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Resolve the initial state from a saved refresh token.
    ///
    /// Publishes exactly one notification: the restored identity, or signed-out
    /// when there is no token or it was rejected.
    pub async fn restore(&self, refresh_token: Option<&str>) -> Result<Option<Identity>, ClientError> {
        let Some(refresh_token) = refresh_token else {
            self.broadcaster.publish(None);
            return Ok(None);
        };

        match self.exchange_refresh_token(refresh_token).await {
            Ok(session) => {
                let identity = session.identity();
                *self.session.lock() = Some(StoredSession::new(session));
                tracing::info!("Restored session for {}", identity.uid);
                self.broadcaster.publish(Some(identity.clone()));
                Ok(Some(identity))
            }
            Err(e) => {
                tracing::warn!("Could not restore session: {}", e);
                self.broadcaster.publish(None);
                Err(e)
            }
        }
    }

    /// Refresh token of the current session, for persisting across restarts.
    pub fn refresh_token(&self) -> Option<String> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.session.refresh_token.clone())
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.broadcaster.current()
    }

    fn fresh_id_token(&self) -> Result<Option<String>, ClientError> {
        let guard = self.session.lock();
        let stored = guard.as_ref().ok_or_else(not_signed_in)?;
        Ok(stored
            .is_fresh()
            .then(|| stored.session.id_token.clone()))
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<AuthSession, ClientError> {
        let request = RefreshTokenRequest {
            refresh_token: refresh_token.to_string(),
        };
        self.transport.post_json(&["auth", "token"], &request, None).await
    }
}

fn not_signed_in() -> ClientError {
    ClientError::PermissionDenied("Not signed in".to_string())
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    fn subscribe(&self) -> mpsc::UnboundedReceiver<Option<Identity>> {
        self.broadcaster.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ClientError> {
        let request = SignInRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        let session: AuthSession = self
            .transport
            .post_json(&["auth", "sign_in"], &request, None)
            .await?;

        let identity = session.identity();
        *self.session.lock() = Some(StoredSession::new(session));
        tracing::info!("Signed in as {}", identity.uid);
        self.broadcaster.publish(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        nickname: &str,
    ) -> Result<Identity, ClientError> {
        let request = CreateUserRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            nickname: nickname.trim().to_string(),
            avatar: None,
        };
        let created: CreateUserResponse = self
            .transport
            .post_json(&["create_user"], &request, None)
            .await?;
        tracing::info!("Registered account {}", created.uid);

        self.sign_in(email, password).await
    }

    async fn sign_out(&self) -> Result<(), ClientError> {
        let stored = self.session.lock().take();
        if let Some(stored) = stored {
            let response = match self
                .transport
                .post(&["auth", "sign_out"], Some(stored.session.id_token.as_str()))
            {
                Ok(request) => request.send().await.map_err(ClientError::from),
                Err(e) => Err(e),
            };
            match response {
                Ok(r) if r.status().is_success() => {}
                Ok(r) => tracing::warn!("Server-side sign out returned {}", r.status()),
                Err(e) => tracing::warn!("Server-side sign out failed: {}", e),
            }
            tracing::info!("Signed out {}", stored.session.uid);
        }
        self.broadcaster.publish(None);
        Ok(())
    }

    async fn id_token(&self, force_refresh: bool) -> Result<String, ClientError> {
        if !force_refresh {
            if let Some(token) = self.fresh_id_token()? {
                return Ok(token);
            }
        }

        let _exchange = self.refresh.lock().await;
        // Another caller may have refreshed while this one waited
        if !force_refresh {
            if let Some(token) = self.fresh_id_token()? {
                return Ok(token);
            }
        }
        let (uid, refresh_token) = {
            let guard = self.session.lock();
            let stored = guard.as_ref().ok_or_else(not_signed_in)?;
            (
                stored.session.uid.clone(),
                stored.session.refresh_token.clone(),
            )
        };

        let session = self.exchange_refresh_token(&refresh_token).await?;
        let token = session.id_token.clone();

        let mut guard = self.session.lock();
        // Signed out, or someone else signed in, while the refresh was in flight
        let same_session = guard.as_ref().is_some_and(|current| current.session.uid == uid);
        if !same_session {
            return Err(ClientError::PermissionDenied(
                "Session ended during token refresh".to_string(),
            ));
        }
        *guard = Some(StoredSession::new(session));
        Ok(token)
    }
}
