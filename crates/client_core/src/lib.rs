use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::{
    domain::{DeliveryStatus, DocumentId, MessageId},
    error::{CoreError, CoreResult},
    protocol::{
        Analysis, ChatMessage, Document, ProfileUpdate, Session, UploadFile, UploadOutcome,
    },
    route::Route,
};
use tokio::sync::broadcast;
use tracing::{error, info};

pub mod http_backend;
pub mod navigation;
pub mod progress;
pub mod registry;
pub mod session;
pub mod shell;
pub mod simulated;
pub mod workflows;

#[cfg(test)]
mod test_support;

pub use navigation::NavigationController;
pub use registry::DocumentRegistry;
pub use session::{SessionStore, SESSION_STORAGE_KEY};
pub use shell::{ApplicationShell, Frame, MountedView, ShellDependencies};
pub use workflows::{AnalysisWorkflow, ChatWorkflow, HistoryWorkflow, UploadHandle, UploadWorkflow};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// State changes broadcast to whatever view layer is listening.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionChanged(Option<Session>),
    RouteChanged(Route),
    DocumentChanged(Document),
    MessageAppended {
        document_id: DocumentId,
        message: ChatMessage,
    },
    MessageStatusChanged {
        document_id: DocumentId,
        message_id: MessageId,
        status: DeliveryStatus,
    },
}

pub fn event_channel() -> broadcast::Sender<ClientEvent> {
    let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
    events
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> CoreResult<Session>;
    async fn sign_up(&self, email: &str, password: &str) -> CoreResult<Session>;
    async fn sign_out(&self) -> CoreResult<()>;
    async fn update_profile(&self, session: &Session, update: &ProfileUpdate) -> CoreResult<()>;
}

pub struct MissingAuthProvider;

#[async_trait]
impl AuthProvider for MissingAuthProvider {
    async fn sign_in(&self, _email: &str, _password: &str) -> CoreResult<Session> {
        Err(CoreError::TransportFailure(
            "authentication service is unavailable".to_string(),
        ))
    }

    async fn sign_up(&self, _email: &str, _password: &str) -> CoreResult<Session> {
        Err(CoreError::TransportFailure(
            "authentication service is unavailable".to_string(),
        ))
    }

    async fn sign_out(&self) -> CoreResult<()> {
        Ok(())
    }

    async fn update_profile(&self, _session: &Session, _update: &ProfileUpdate) -> CoreResult<()> {
        Err(CoreError::TransportFailure(
            "authentication service is unavailable".to_string(),
        ))
    }
}

#[async_trait]
pub trait UploadTransport: Send + Sync {
    /// Submits the file and resolves once the backend has analyzed it.
    async fn submit(&self, document_id: &DocumentId, file: &UploadFile) -> Result<UploadOutcome>;
}

pub struct MissingUploadTransport;

#[async_trait]
impl UploadTransport for MissingUploadTransport {
    async fn submit(&self, document_id: &DocumentId, _file: &UploadFile) -> Result<UploadOutcome> {
        Err(anyhow!(
            "upload transport is unavailable for document {document_id}"
        ))
    }
}

#[async_trait]
pub trait AnalysisFetch: Send + Sync {
    /// `Ok(None)` means the backend has no analysis for this document yet.
    async fn fetch(&self, document_id: &DocumentId) -> Result<Option<Analysis>>;
}

pub struct MissingAnalysisFetch;

#[async_trait]
impl AnalysisFetch for MissingAnalysisFetch {
    async fn fetch(&self, document_id: &DocumentId) -> Result<Option<Analysis>> {
        Err(anyhow!(
            "analysis service is unavailable for document {document_id}"
        ))
    }
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn reply(&self, document_id: &DocumentId, user_text: &str) -> Result<String>;
}

pub struct MissingReplyGenerator;

#[async_trait]
impl ReplyGenerator for MissingReplyGenerator {
    async fn reply(&self, document_id: &DocumentId, _user_text: &str) -> Result<String> {
        Err(anyhow!(
            "reply generator is unavailable for document {document_id}"
        ))
    }
}

#[async_trait]
pub trait HistoryFetch: Send + Sync {
    async fn fetch_history(&self) -> Result<Vec<Document>>;
}

pub struct MissingHistoryFetch;

#[async_trait]
impl HistoryFetch for MissingHistoryFetch {
    async fn fetch_history(&self) -> Result<Vec<Document>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Error,
}

/// Fire-and-forget user notifications. Callers never wait on or branch on it.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

pub struct TracingNotificationSink;

impl NotificationSink for TracingNotificationSink {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Success => info!(notice = message, "notify: success"),
            NoticeLevel::Error => error!(notice = message, "notify: error"),
        }
    }
}
