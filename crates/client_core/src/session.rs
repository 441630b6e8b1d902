use std::sync::Arc;

use shared::{
    error::{CoreError, CoreResult},
    protocol::{ProfileUpdate, Session},
};
use storage::PersistenceStore;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::{AuthProvider, ClientEvent};

pub const SESSION_STORAGE_KEY: &str = "lexdesk.session.v1";

/// Owns the single active [`Session`] and its persisted copy.
///
/// Every mutation writes the store first and only then swaps the in-memory
/// value, both under the same lock, so a failed write leaves neither changed.
pub struct SessionStore {
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn PersistenceStore>,
    current: Mutex<Option<Session>>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionStore {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn PersistenceStore>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            auth,
            store,
            current: Mutex::new(None),
            events,
        }
    }

    pub async fn current(&self) -> Option<Session> {
        self.current.lock().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.current.lock().await.is_some()
    }

    pub async fn login(&self, email: &str, password: &str) -> CoreResult<Session> {
        let session = self.auth.sign_in(email, password).await.inspect_err(|err| {
            warn!("session: sign-in rejected email={email}: {err}");
        })?;
        self.replace(session).await
    }

    pub async fn signup(&self, email: &str, password: &str) -> CoreResult<Session> {
        let session = self.auth.sign_up(email, password).await?;
        self.replace(session).await
    }

    /// Clears the local session first, then tells the backend. A failed
    /// local clear leaves the remote session alone.
    pub async fn logout(&self) -> CoreResult<()> {
        let mut guard = self.current.lock().await;
        self.store
            .remove(SESSION_STORAGE_KEY)
            .await
            .map_err(CoreError::persistence)?;

        let Some(previous) = guard.take() else {
            return Ok(());
        };
        if let Err(err) = self.auth.sign_out().await {
            warn!("session: remote sign-out failed, local session already cleared: {err}");
        }
        drop(guard);

        info!("session: logged out user={}", previous.id);
        let _ = self.events.send(ClientEvent::SessionChanged(None));
        Ok(())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> CoreResult<Session> {
        let mut guard = self.current.lock().await;
        let Some(current) = guard.as_ref() else {
            return Err(CoreError::NoActiveSession);
        };

        self.auth.update_profile(current, &update).await?;
        let updated = current.clone().apply(&update);
        self.persist(&updated).await?;
        *guard = Some(updated.clone());
        drop(guard);

        info!("session: profile updated user={}", updated.id);
        let _ = self
            .events
            .send(ClientEvent::SessionChanged(Some(updated.clone())));
        Ok(updated)
    }

    /// Loads the persisted session, if any. Absent, unreadable or malformed
    /// blobs all yield `None`; nothing is surfaced to the caller.
    pub async fn restore(&self) -> Option<Session> {
        let blob = match self.store.load(SESSION_STORAGE_KEY).await {
            Ok(Some(blob)) => blob,
            Ok(None) => return None,
            Err(err) => {
                warn!("session: failed to read persisted session: {err:#}");
                return None;
            }
        };

        let session = match serde_json::from_str::<Session>(&blob) {
            Ok(session) => session,
            Err(err) => {
                warn!("session: ignoring malformed persisted session: {err}");
                return None;
            }
        };

        *self.current.lock().await = Some(session.clone());
        info!("session: restored user={}", session.id);
        let _ = self
            .events
            .send(ClientEvent::SessionChanged(Some(session.clone())));
        Some(session)
    }

    async fn replace(&self, session: Session) -> CoreResult<Session> {
        let mut guard = self.current.lock().await;
        self.persist(&session).await?;
        *guard = Some(session.clone());
        drop(guard);

        info!("session: signed in user={} email={}", session.id, session.email);
        let _ = self
            .events
            .send(ClientEvent::SessionChanged(Some(session.clone())));
        Ok(session)
    }

    async fn persist(&self, session: &Session) -> CoreResult<()> {
        let blob = serde_json::to_string(session).map_err(CoreError::persistence)?;
        self.store
            .save(SESSION_STORAGE_KEY, &blob)
            .await
            .map_err(CoreError::persistence)
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
