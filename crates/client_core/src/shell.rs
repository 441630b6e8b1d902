//! Composition root tying the session, navigation and document state
//! together and deciding which view the presentation layer mounts.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::DocumentId,
    error::{CoreError, CoreResult, NotFoundReason},
    protocol::{Analysis, ChatMessage, Conversation, Document, ProfileUpdate, Session, UploadFile},
    route::Route,
};
use storage::PersistenceStore;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    event_channel,
    http_backend::HttpBackend,
    simulated::{SimulatedBackend, TestAccountAuthProvider},
    workflows::DEFAULT_UPLOAD_TICK,
    AnalysisFetch, AnalysisWorkflow, AuthProvider, ChatWorkflow, ClientEvent, DocumentRegistry,
    HistoryFetch, HistoryWorkflow, MissingAnalysisFetch, MissingAuthProvider, MissingHistoryFetch,
    MissingReplyGenerator, MissingUploadTransport, NavigationController, NoticeLevel,
    NotificationSink, ReplyGenerator, SessionStore, TracingNotificationSink, UploadHandle,
    UploadTransport, UploadWorkflow,
};

/// External collaborators the shell is built from.
pub struct ShellDependencies {
    pub store: Arc<dyn PersistenceStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub uploads: Arc<dyn UploadTransport>,
    pub analyses: Arc<dyn AnalysisFetch>,
    pub replies: Arc<dyn ReplyGenerator>,
    pub history: Arc<dyn HistoryFetch>,
    pub notifier: Arc<dyn NotificationSink>,
    pub upload_tick: Duration,
}

impl ShellDependencies {
    /// Nothing wired: every remote call fails until replaced.
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            store,
            auth: Arc::new(MissingAuthProvider),
            uploads: Arc::new(MissingUploadTransport),
            analyses: Arc::new(MissingAnalysisFetch),
            replies: Arc::new(MissingReplyGenerator),
            history: Arc::new(MissingHistoryFetch),
            notifier: Arc::new(TracingNotificationSink),
            upload_tick: DEFAULT_UPLOAD_TICK,
        }
    }

    pub fn simulated(
        store: Arc<dyn PersistenceStore>,
        auth: TestAccountAuthProvider,
        backend: SimulatedBackend,
    ) -> Self {
        let backend = Arc::new(backend);
        Self {
            auth: Arc::new(auth),
            uploads: backend.clone(),
            analyses: backend.clone(),
            replies: backend.clone(),
            history: backend,
            ..Self::new(store)
        }
    }

    pub fn http(store: Arc<dyn PersistenceStore>, backend: HttpBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            auth: backend.clone(),
            uploads: backend.clone(),
            analyses: backend.clone(),
            replies: backend.clone(),
            history: backend,
            ..Self::new(store)
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_upload_tick(mut self, upload_tick: Duration) -> Self {
        self.upload_tick = upload_tick;
        self
    }
}

/// What the presentation layer should mount, with the data it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum MountedView {
    Auth,
    Dashboard {
        documents: Vec<Document>,
    },
    Upload,
    Analysis {
        document: Document,
        analysis: Analysis,
    },
    Chat {
        document: Document,
        conversation: Conversation,
    },
    Profile {
        session: Session,
    },
    /// A document view whose document is unknown, still processing or failed.
    Unavailable {
        document_id: DocumentId,
        reason: NotFoundReason,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub session: Option<Session>,
    pub route: Route,
    pub mounted: MountedView,
}

pub struct ApplicationShell {
    session: Arc<SessionStore>,
    navigation: NavigationController,
    registry: Arc<DocumentRegistry>,
    uploads: UploadWorkflow,
    analyses: AnalysisWorkflow,
    chat: ChatWorkflow,
    history: HistoryWorkflow,
    notifier: Arc<dyn NotificationSink>,
    events: broadcast::Sender<ClientEvent>,
}

impl ApplicationShell {
    /// Builds the shell and restores any persisted session before the first
    /// route is chosen.
    pub async fn start(deps: ShellDependencies) -> Self {
        let events = event_channel();
        let session = Arc::new(SessionStore::new(
            deps.auth,
            deps.store,
            events.clone(),
        ));
        session.restore().await;

        let initial = NavigationController::initial_route(&session).await;
        info!("shell: started route={initial}");
        let navigation = NavigationController::new(session.clone(), initial, events.clone());
        let registry = Arc::new(DocumentRegistry::new(events.clone()));

        Self {
            uploads: UploadWorkflow::new(
                registry.clone(),
                deps.uploads,
                deps.notifier.clone(),
                deps.upload_tick,
            ),
            analyses: AnalysisWorkflow::new(registry.clone(), deps.analyses, deps.notifier.clone()),
            chat: ChatWorkflow::new(registry.clone(), deps.replies, deps.notifier.clone()),
            history: HistoryWorkflow::new(registry.clone(), deps.history, deps.notifier.clone()),
            session,
            navigation,
            registry,
            notifier: deps.notifier,
            events,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn navigation(&self) -> &NavigationController {
        &self.navigation
    }

    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    pub async fn render(&self) -> Frame {
        let session = self.session.current().await;
        let route = self.navigation.current_route().await;
        let mounted = match &route {
            Route::Auth => MountedView::Auth,
            Route::Dashboard => MountedView::Dashboard {
                documents: self.registry.list_documents().await,
            },
            Route::Upload => MountedView::Upload,
            Route::Analysis { document_id } => {
                match self.registry.get_analysis(document_id).await {
                    Ok(analysis) => match self.registry.get_document(document_id).await {
                        Ok(document) => MountedView::Analysis { document, analysis },
                        Err(_) => unavailable(document_id, NotFoundReason::Unknown),
                    },
                    Err(err) => unavailable(document_id, reason_of(&err)),
                }
            }
            Route::Chat { document_id } => {
                match self.registry.get_conversation(document_id).await {
                    Ok(conversation) => match self.registry.get_document(document_id).await {
                        Ok(document) => MountedView::Chat {
                            document,
                            conversation,
                        },
                        Err(_) => unavailable(document_id, NotFoundReason::Unknown),
                    },
                    Err(err) => unavailable(document_id, reason_of(&err)),
                }
            }
            Route::Profile => match &session {
                Some(session) => MountedView::Profile {
                    session: session.clone(),
                },
                None => MountedView::Auth,
            },
        };

        Frame {
            session,
            route,
            mounted,
        }
    }

    pub async fn navigate(&self, route: Route) -> Route {
        self.navigation.navigate(route).await
    }

    pub async fn login(&self, email: &str, password: &str) -> CoreResult<Session> {
        let session = self
            .session
            .login(email, password)
            .await
            .inspect_err(|err| self.report(err))?;
        self.navigation.on_authenticated().await;
        self.notifier
            .notify(NoticeLevel::Success, &format!("Welcome back, {}", session.label()));
        Ok(session)
    }

    pub async fn signup(&self, email: &str, password: &str) -> CoreResult<Session> {
        let session = self
            .session
            .signup(email, password)
            .await
            .inspect_err(|err| self.report(err))?;
        self.navigation.on_authenticated().await;
        self.notifier
            .notify(NoticeLevel::Success, &format!("Welcome, {}", session.label()));
        Ok(session)
    }

    pub async fn logout(&self) -> CoreResult<()> {
        self.session
            .logout()
            .await
            .inspect_err(|err| self.report(err))?;
        self.navigation.on_logged_out().await;
        Ok(())
    }

    pub async fn update_profile(&self, update: ProfileUpdate) -> CoreResult<Session> {
        let session = self
            .session
            .update_profile(update)
            .await
            .inspect_err(|err| self.report(err))?;
        self.notifier.notify(NoticeLevel::Success, "Profile updated");
        Ok(session)
    }

    pub async fn upload(&self, file: UploadFile) -> CoreResult<UploadHandle> {
        self.require_session().await?;
        self.uploads
            .start(file)
            .await
            .inspect_err(|err| self.report_local(err))
    }

    pub async fn refresh_documents(&self) -> CoreResult<Vec<Document>> {
        self.require_session().await?;
        self.history
            .refresh()
            .await
            .inspect_err(|err| self.report_local(err))
    }

    /// Navigates to the analysis view and loads the analysis for it.
    pub async fn open_analysis(&self, document_id: &DocumentId) -> CoreResult<Analysis> {
        self.navigate(Route::Analysis {
            document_id: document_id.clone(),
        })
        .await;
        self.require_session().await?;
        self.analyses
            .open(document_id)
            .await
            .inspect_err(|err| self.report_local(err))
    }

    pub async fn send_message(
        &self,
        document_id: &DocumentId,
        text: &str,
    ) -> CoreResult<ChatMessage> {
        self.require_session().await?;
        self.chat
            .send(document_id, text)
            .await
            .inspect_err(|err| self.report_local(err))
    }

    async fn require_session(&self) -> CoreResult<()> {
        if self.session.is_authenticated().await {
            Ok(())
        } else {
            let err = CoreError::NoActiveSession;
            self.report(&err);
            Err(err)
        }
    }

    fn report(&self, err: &CoreError) {
        self.notifier.notify(NoticeLevel::Error, &err.to_string());
    }

    /// Workflows report the transport failures they hit themselves.
    fn report_local(&self, err: &CoreError) {
        if !matches!(err, CoreError::TransportFailure(_)) {
            self.report(err);
        }
    }
}

fn unavailable(document_id: &DocumentId, reason: NotFoundReason) -> MountedView {
    MountedView::Unavailable {
        document_id: document_id.clone(),
        reason,
    }
}

fn reason_of(err: &CoreError) -> NotFoundReason {
    match err {
        CoreError::NotFound { reason, .. } => *reason,
        _ => NotFoundReason::Unknown,
    }
}

#[cfg(test)]
#[path = "tests/shell_tests.rs"]
mod tests;
