use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use shared::{
    error::CoreError,
    protocol::{ProfileUpdate, Session},
};
use storage::{MemoryStore, PersistenceStore};

use super::*;
use crate::{
    simulated::{DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD},
    test_support::{session_store_with, FailingStore},
};

#[tokio::test]
async fn login_persists_session_blob() {
    let store = Arc::new(MemoryStore::new());
    let sessions = session_store_with(store.clone());

    let session = sessions
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");

    assert_eq!(sessions.current().await, Some(session.clone()));
    let blob = store
        .load(SESSION_STORAGE_KEY)
        .await
        .expect("load")
        .expect("persisted blob");
    let persisted: Session = serde_json::from_str(&blob).expect("decode blob");
    assert_eq!(persisted, session);
}

#[tokio::test]
async fn rejected_login_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let sessions = session_store_with(store.clone());

    let err = sessions
        .login(DEFAULT_TEST_EMAIL, "wrong-password")
        .await
        .expect_err("bad password");

    assert_eq!(err, CoreError::InvalidCredentials);
    assert!(!sessions.is_authenticated().await);
    assert_eq!(store.load(SESSION_STORAGE_KEY).await.expect("load"), None);
}

/// Test account that counts remote sign-outs.
#[derive(Default)]
struct CountingAuth {
    inner: crate::simulated::TestAccountAuthProvider,
    sign_outs: AtomicUsize,
}

#[async_trait]
impl AuthProvider for CountingAuth {
    async fn sign_in(&self, email: &str, password: &str) -> CoreResult<Session> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> CoreResult<Session> {
        self.inner.sign_up(email, password).await
    }

    async fn sign_out(&self) -> CoreResult<()> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn update_profile(&self, session: &Session, update: &ProfileUpdate) -> CoreResult<()> {
        self.inner.update_profile(session, update).await
    }
}

#[tokio::test]
async fn logout_clears_memory_and_storage() {
    let store = Arc::new(MemoryStore::new());
    let sessions = session_store_with(store.clone());
    sessions
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");

    sessions.logout().await.expect("logout");

    assert_eq!(sessions.current().await, None);
    assert_eq!(store.load(SESSION_STORAGE_KEY).await.expect("load"), None);

    let restarted = session_store_with(store);
    assert_eq!(restarted.restore().await, None);
}

#[tokio::test]
async fn logout_without_session_is_a_no_op() {
    let sessions = session_store_with(Arc::new(MemoryStore::new()));
    sessions.logout().await.expect("first logout");
    sessions.logout().await.expect("second logout");
    assert!(!sessions.is_authenticated().await);
}

#[tokio::test]
async fn restore_returns_persisted_session_after_restart() {
    let store = Arc::new(MemoryStore::new());
    let first = session_store_with(store.clone());
    let session = first
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");

    let second = session_store_with(store);
    assert_eq!(second.restore().await, Some(session.clone()));
    assert_eq!(second.current().await, Some(session));
}

#[tokio::test]
async fn malformed_blob_restores_as_signed_out() {
    let store = Arc::new(MemoryStore::new());
    store
        .save(SESSION_STORAGE_KEY, "{\"id\": 42")
        .await
        .expect("seed garbage");

    let sessions = session_store_with(store);
    assert_eq!(sessions.restore().await, None);
    assert!(!sessions.is_authenticated().await);
}

#[tokio::test]
async fn update_profile_requires_a_session() {
    let sessions = session_store_with(Arc::new(MemoryStore::new()));
    let err = sessions
        .update_profile(ProfileUpdate {
            display_name: Some("Ada".to_string()),
        })
        .await
        .expect_err("signed out");
    assert_eq!(err, CoreError::NoActiveSession);
}

#[tokio::test]
async fn update_profile_merges_and_persists() {
    let store = Arc::new(MemoryStore::new());
    let sessions = session_store_with(store.clone());
    let before = sessions
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");

    let updated = sessions
        .update_profile(ProfileUpdate {
            display_name: Some("Ada Lovelace".to_string()),
        })
        .await
        .expect("update");

    assert_eq!(updated.email, before.email);
    assert_eq!(updated.display_name.as_deref(), Some("Ada Lovelace"));
    let blob = store
        .load(SESSION_STORAGE_KEY)
        .await
        .expect("load")
        .expect("blob");
    assert_eq!(
        serde_json::from_str::<Session>(&blob).expect("decode"),
        updated
    );

    // An empty update keeps every field.
    let unchanged = sessions
        .update_profile(ProfileUpdate::default())
        .await
        .expect("empty update");
    assert_eq!(unchanged, updated);
}

#[tokio::test]
async fn failed_write_leaves_memory_untouched() {
    let sessions = session_store_with(Arc::new(FailingStore::default()));

    let err = sessions
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect_err("write fails");

    assert!(matches!(err, CoreError::Persistence(_)));
    assert!(!sessions.is_authenticated().await);
}

#[tokio::test]
async fn session_changes_are_broadcast() {
    let events = crate::event_channel();
    let mut rx = events.subscribe();
    let sessions = SessionStore::new(
        Arc::new(crate::simulated::TestAccountAuthProvider::default()),
        Arc::new(MemoryStore::new()),
        events,
    );

    sessions
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");
    sessions.logout().await.expect("logout");

    match rx.recv().await.expect("login event") {
        ClientEvent::SessionChanged(Some(session)) => assert_eq!(session.email, DEFAULT_TEST_EMAIL),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(matches!(
        rx.recv().await.expect("logout event"),
        ClientEvent::SessionChanged(None)
    ));
}

#[tokio::test]
async fn failed_local_clear_keeps_remote_session() {
    let first_store = Arc::new(MemoryStore::new());
    let session = session_store_with(first_store.clone())
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");
    let blob = first_store
        .load(SESSION_STORAGE_KEY)
        .await
        .expect("load")
        .expect("persisted blob");
    let seeded = MemoryStore::new();
    seeded.save(SESSION_STORAGE_KEY, &blob).await.expect("seed");

    let auth = Arc::new(CountingAuth::default());
    let sessions = SessionStore::new(
        auth.clone(),
        Arc::new(FailingStore::over(seeded)),
        crate::event_channel(),
    );
    assert_eq!(sessions.restore().await, Some(session.clone()));

    let err = sessions.logout().await.expect_err("remove fails");
    assert!(matches!(err, CoreError::Persistence(_)));
    assert_eq!(sessions.current().await, Some(session));
    assert_eq!(auth.sign_outs.load(Ordering::SeqCst), 0);

    let working = SessionStore::new(
        auth.clone(),
        Arc::new(MemoryStore::new()),
        crate::event_channel(),
    );
    working
        .login(DEFAULT_TEST_EMAIL, DEFAULT_TEST_PASSWORD)
        .await
        .expect("login");
    working.logout().await.expect("logout");
    working.logout().await.expect("second logout");
    assert_eq!(auth.sign_outs.load(Ordering::SeqCst), 1);
}
