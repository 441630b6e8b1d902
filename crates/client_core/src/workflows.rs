//! Orchestration of the asynchronous operations that feed the registry.
//!
//! Each workflow writes its result into the [`DocumentRegistry`] exactly once
//! and never into view state, so a view may go away mid-operation without
//! leaving a document or message half-updated.

use std::{collections::HashMap, fmt, sync::Arc, time::Duration};

use shared::{
    domain::{DeliveryStatus, DocumentId},
    error::{CoreError, CoreResult, NotFoundReason},
    protocol::{Analysis, ChatMessage, Document, UploadFile},
};
use tokio::{
    sync::{watch, Mutex, OwnedMutexGuard},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    progress::{spawn_progress_ticker, TickerGuard, PROGRESS_DONE},
    AnalysisFetch, DocumentRegistry, HistoryFetch, NoticeLevel, NotificationSink, ReplyGenerator,
    UploadTransport,
};

pub const DEFAULT_UPLOAD_TICK: Duration = Duration::from_millis(200);

/// View-side handle on a running upload. Dropping it stops the progress
/// ticker; the upload itself keeps running and still lands in the registry.
pub struct UploadHandle {
    document: Document,
    progress: watch::Receiver<u8>,
    ticker: TickerGuard,
    task: JoinHandle<CoreResult<Document>>,
}

impl fmt::Debug for UploadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadHandle")
            .field("document", &self.document.id)
            .field("progress", &*self.progress.borrow())
            .finish_non_exhaustive()
    }
}

impl UploadHandle {
    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.clone()
    }

    /// Waits for the upload to resolve and returns the resolved document.
    pub async fn wait(self) -> CoreResult<Document> {
        let UploadHandle { task, ticker, .. } = self;
        let joined = task.await;
        drop(ticker);
        joined.map_err(|err| CoreError::TransportFailure(format!("upload task ended: {err}")))?
    }
}

pub struct UploadWorkflow {
    registry: Arc<DocumentRegistry>,
    transport: Arc<dyn UploadTransport>,
    notifier: Arc<dyn NotificationSink>,
    tick_period: Duration,
}

impl UploadWorkflow {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        transport: Arc<dyn UploadTransport>,
        notifier: Arc<dyn NotificationSink>,
        tick_period: Duration,
    ) -> Self {
        Self {
            registry,
            transport,
            notifier,
            tick_period,
        }
    }

    /// Registers the document as processing and hands the file to the
    /// transport in the background.
    pub async fn start(&self, file: UploadFile) -> CoreResult<UploadHandle> {
        let document = self.registry.begin_upload(&file).await?;

        let (progress_tx, progress_rx) = watch::channel(0u8);
        let progress_tx = Arc::new(progress_tx);
        let ticker = spawn_progress_ticker(self.tick_period, progress_tx.clone());

        let task = tokio::spawn(run_upload(
            self.registry.clone(),
            self.transport.clone(),
            self.notifier.clone(),
            document.id.clone(),
            file,
            ticker.share(),
            progress_tx,
        ));

        Ok(UploadHandle {
            document,
            progress: progress_rx,
            ticker,
            task,
        })
    }
}

async fn run_upload(
    registry: Arc<DocumentRegistry>,
    transport: Arc<dyn UploadTransport>,
    notifier: Arc<dyn NotificationSink>,
    document_id: DocumentId,
    file: UploadFile,
    ticker: TickerGuard,
    progress: Arc<watch::Sender<u8>>,
) -> CoreResult<Document> {
    // A panicking transport must still resolve the document.
    let submit = {
        let document_id = document_id.clone();
        tokio::spawn(async move { transport.submit(&document_id, &file).await })
    };
    let outcome = submit
        .await
        .unwrap_or_else(|err| Err(anyhow::anyhow!("upload transport stopped: {err}")));
    ticker.cancel();

    let outcome = outcome.and_then(|outcome| {
        if outcome.document_id == document_id {
            Ok(outcome)
        } else {
            Err(anyhow::anyhow!(
                "transport answered for document {} instead of {document_id}",
                outcome.document_id
            ))
        }
    });

    match outcome {
        Ok(outcome) => {
            let risk_level = outcome.risk_level;
            let document = match registry
                .complete_upload(&document_id, risk_level, outcome.analysis)
                .await
            {
                Ok(document) => document,
                // An analysis refresh got there first; its result stands.
                Err(CoreError::AlreadyResolved(_)) => {
                    progress.send_replace(PROGRESS_DONE);
                    return registry.get_document(&document_id).await;
                }
                Err(err) => return Err(err),
            };
            progress.send_replace(PROGRESS_DONE);
            info!("upload: completed document={document_id} risk={risk_level}");
            notifier.notify(
                NoticeLevel::Success,
                &format!("{} analyzed ({risk_level} risk)", document.name),
            );
            Ok(document)
        }
        Err(err) => {
            let reason = format!("{err:#}");
            warn!("upload: failed document={document_id}: {reason}");
            let document = match registry.fail_upload(&document_id, &reason).await {
                Ok(document) => document,
                Err(CoreError::AlreadyResolved(_)) => {
                    return registry.get_document(&document_id).await
                }
                Err(err) => return Err(err),
            };
            notifier.notify(
                NoticeLevel::Error,
                &format!("Upload of {} failed: {reason}", document.name),
            );
            Err(CoreError::TransportFailure(reason))
        }
    }
}

pub struct AnalysisWorkflow {
    registry: Arc<DocumentRegistry>,
    fetcher: Arc<dyn AnalysisFetch>,
    notifier: Arc<dyn NotificationSink>,
}

impl AnalysisWorkflow {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        fetcher: Arc<dyn AnalysisFetch>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            fetcher,
            notifier,
        }
    }

    /// Returns the tracked analysis, asking the backend only while the
    /// document is still processing.
    pub async fn open(&self, document_id: &DocumentId) -> CoreResult<Analysis> {
        match self.registry.get_analysis(document_id).await {
            Err(CoreError::NotFound {
                reason: NotFoundReason::Processing,
                ..
            }) => self.refresh(document_id).await,
            other => other,
        }
    }

    /// Polls the backend once for a processing document's analysis and
    /// completes the document when one is available.
    pub async fn refresh(&self, document_id: &DocumentId) -> CoreResult<Analysis> {
        let fetched = match self.fetcher.fetch(document_id).await {
            Ok(fetched) => fetched,
            Err(err) => {
                let err = CoreError::transport(err);
                self.notifier.notify(
                    NoticeLevel::Error,
                    &format!("Could not load analysis: {err}"),
                );
                return Err(err);
            }
        };

        let Some(analysis) = fetched else {
            return self.registry.get_analysis(document_id).await;
        };

        match self
            .registry
            .complete_upload(document_id, analysis.overall_risk(), analysis)
            .await
        {
            Ok(document) => {
                info!("analysis: fetched document={}", document.id);
                self.registry.get_analysis(document_id).await
            }
            // The upload resolved first; its result stands.
            Err(CoreError::AlreadyResolved(_)) => self.registry.get_analysis(document_id).await,
            Err(CoreError::UnknownDocument(_)) => Err(CoreError::not_found(
                document_id.clone(),
                NotFoundReason::Unknown,
            )),
            Err(err) => Err(err),
        }
    }
}

/// Sends chat messages, one at a time per conversation.
pub struct ChatWorkflow {
    registry: Arc<DocumentRegistry>,
    replies: Arc<dyn ReplyGenerator>,
    notifier: Arc<dyn NotificationSink>,
    queues: Mutex<HashMap<DocumentId, Arc<Mutex<()>>>>,
}

impl ChatWorkflow {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        replies: Arc<dyn ReplyGenerator>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            replies,
            notifier,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Appends the user's message, then the generated reply. On a reply
    /// failure the user message is kept and marked `Error`.
    ///
    /// Once the message has its turn the exchange runs on its own task, so
    /// dropping the returned future does not stop the reply from landing.
    pub async fn send(&self, document_id: &DocumentId, text: &str) -> CoreResult<ChatMessage> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::Validation("message is empty".to_string()));
        }

        let queue = self.queue_for(document_id).await;
        // Tokio's mutex is fair, so waiting senders go in arrival order.
        let turn = queue.lock_owned().await;

        let exchange = tokio::spawn(run_exchange(
            self.registry.clone(),
            self.replies.clone(),
            self.notifier.clone(),
            document_id.clone(),
            text.to_string(),
            turn,
        ));
        exchange
            .await
            .map_err(|err| CoreError::TransportFailure(format!("chat task ended: {err}")))?
    }

    async fn queue_for(&self, document_id: &DocumentId) -> Arc<Mutex<()>> {
        self.queues
            .lock()
            .await
            .entry(document_id.clone())
            .or_default()
            .clone()
    }
}

async fn run_exchange(
    registry: Arc<DocumentRegistry>,
    replies: Arc<dyn ReplyGenerator>,
    notifier: Arc<dyn NotificationSink>,
    document_id: DocumentId,
    text: String,
    _turn: OwnedMutexGuard<()>,
) -> CoreResult<ChatMessage> {
    let outgoing = registry
        .append_message(&document_id, ChatMessage::user(&text))
        .await?;
    registry
        .set_delivery_status(&document_id, &outgoing.id, DeliveryStatus::Sent)
        .await?;

    let generate = {
        let document_id = document_id.clone();
        tokio::spawn(async move { replies.reply(&document_id, &text).await })
    };
    let reply = generate
        .await
        .unwrap_or_else(|err| Err(anyhow::anyhow!("reply generator stopped: {err}")));

    match reply {
        Ok(reply) => {
            registry
                .append_message(&document_id, ChatMessage::assistant(reply))
                .await
        }
        Err(err) => {
            let err = CoreError::transport(err);
            warn!("chat: reply failed document={document_id}: {err}");
            registry
                .set_delivery_status(&document_id, &outgoing.id, DeliveryStatus::Error)
                .await?;
            notifier.notify(NoticeLevel::Error, &format!("Message not answered: {err}"));
            Err(err)
        }
    }
}

pub struct HistoryWorkflow {
    registry: Arc<DocumentRegistry>,
    history: Arc<dyn HistoryFetch>,
    notifier: Arc<dyn NotificationSink>,
}

impl HistoryWorkflow {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        history: Arc<dyn HistoryFetch>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            registry,
            history,
            notifier,
        }
    }

    /// Refreshes the cached document list. A failed fetch leaves the
    /// previous cache in place.
    pub async fn refresh(&self) -> CoreResult<Vec<Document>> {
        match self.history.fetch_history().await {
            Ok(documents) => {
                self.registry.apply_history(documents).await;
                Ok(self.registry.list_documents().await)
            }
            Err(err) => {
                let err = CoreError::transport(err);
                warn!("history: refresh failed: {err}");
                self.notifier.notify(
                    NoticeLevel::Error,
                    &format!("Could not refresh documents: {err}"),
                );
                Err(err)
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/workflows_tests.rs"]
mod tests;
