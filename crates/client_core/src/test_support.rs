use std::{
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use shared::{
    domain::{DocumentId, RiskLevel},
    protocol::{Analysis, Risk, UploadFile, UploadOutcome},
};
use storage::{MemoryStore, PersistenceStore};
use tokio::sync::Notify;

use crate::{
    event_channel, simulated::TestAccountAuthProvider, NoticeLevel, NotificationSink,
    ReplyGenerator, SessionStore, UploadTransport,
};

#[derive(Default)]
pub struct RecordingSink {
    notices: StdMutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().expect("notices lock").clone()
    }

    pub fn count(&self, level: NoticeLevel) -> usize {
        self.notices()
            .iter()
            .filter(|(recorded, _)| *recorded == level)
            .count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices
            .lock()
            .expect("notices lock")
            .push((level, message.to_string()));
    }
}

/// Reads work, writes fail.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
}

impl FailingStore {
    /// Serves reads from `inner`, e.g. a store already holding a session.
    pub fn over(inner: MemoryStore) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl PersistenceStore for FailingStore {
    async fn save(&self, key: &str, _blob: &str) -> Result<()> {
        bail!("disk full while writing {key}")
    }

    async fn load(&self, key: &str) -> Result<Option<String>> {
        self.inner.load(key).await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        bail!("disk full while removing {key}")
    }
}

/// Holds every submission until the gate is opened, then answers with the
/// scripted risk level or failure.
pub struct GatedUploadTransport {
    pub gate: Arc<Notify>,
    outcome: Result<RiskLevel, String>,
}

impl GatedUploadTransport {
    pub fn succeeding(risk_level: RiskLevel) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            outcome: Ok(risk_level),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            gate: Arc::new(Notify::new()),
            outcome: Err(reason.to_string()),
        }
    }
}

#[async_trait]
impl UploadTransport for GatedUploadTransport {
    async fn submit(&self, document_id: &DocumentId, _file: &UploadFile) -> Result<UploadOutcome> {
        self.gate.notified().await;
        match &self.outcome {
            Ok(risk_level) => Ok(UploadOutcome {
                document_id: document_id.clone(),
                risk_level: *risk_level,
                analysis: sample_analysis(*risk_level),
            }),
            Err(reason) => Err(anyhow!(reason.clone())),
        }
    }
}

/// Echoes the question back after `delay`, or fails when `fail` is set.
pub struct ScriptedReplies {
    pub delay: Duration,
    pub fail: bool,
}

impl ScriptedReplies {
    pub fn echo() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            delay: Duration::ZERO,
            fail: true,
        }
    }
}

#[async_trait]
impl ReplyGenerator for ScriptedReplies {
    async fn reply(&self, _document_id: &DocumentId, user_text: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            bail!("model overloaded");
        }
        Ok(format!("re: {user_text}"))
    }
}

pub fn sample_analysis(risk_level: RiskLevel) -> Analysis {
    Analysis {
        summary: "Two-year services agreement with automatic renewal.".to_string(),
        risks: vec![Risk {
            kind: "renewal".to_string(),
            description: "Renews automatically unless cancelled 90 days ahead.".to_string(),
            severity: risk_level,
            recommendation: "Diary the cancellation window.".to_string(),
        }],
        ..Analysis::default()
    }
}

pub fn upload_file(name: &str) -> UploadFile {
    UploadFile {
        name: name.to_string(),
        content_type: "application/pdf".to_string(),
        bytes: b"%PDF-1.7 test".to_vec(),
    }
}

pub fn session_store_with(store: Arc<dyn PersistenceStore>) -> SessionStore {
    SessionStore::new(
        Arc::new(TestAccountAuthProvider::default()),
        store,
        event_channel(),
    )
}
