use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::{
    domain::{DeliveryStatus, DocumentId, MessageId, RiskLevel},
    error::{CoreError, CoreResult, NotFoundReason},
    protocol::{Analysis, ChatMessage, Conversation, Document, DocumentState, UploadFile},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::ClientEvent;

struct DocumentEntry {
    document: Document,
    // Tie-breaker for equal upload timestamps: later insertions list first.
    seq: u64,
}

#[derive(Default)]
struct RegistryState {
    documents: HashMap<DocumentId, DocumentEntry>,
    conversations: HashMap<DocumentId, Conversation>,
    next_seq: u64,
    history_synced_at: Option<DateTime<Utc>>,
}

impl RegistryState {
    fn insert(&mut self, document: Document) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.documents
            .insert(document.id.clone(), DocumentEntry { document, seq });
    }

    fn document(&self, document_id: &DocumentId) -> CoreResult<&Document> {
        self.documents
            .get(document_id)
            .map(|entry| &entry.document)
            .ok_or_else(|| CoreError::UnknownDocument(document_id.clone()))
    }

    fn conversation_mut(&mut self, document_id: &DocumentId) -> CoreResult<&mut Conversation> {
        let document = self.document(document_id)?;
        match document.state {
            DocumentState::Completed { .. } => {}
            DocumentState::Processing => {
                return Err(CoreError::not_found(
                    document_id.clone(),
                    NotFoundReason::Processing,
                ))
            }
            DocumentState::Error { .. } => {
                return Err(CoreError::not_found(
                    document_id.clone(),
                    NotFoundReason::Failed,
                ))
            }
        }

        if !self.conversations.contains_key(document_id) {
            let seeded = Conversation::seeded(document);
            debug!("registry: seeded conversation document={document_id}");
            self.conversations.insert(document_id.clone(), seeded);
        }
        self.conversations
            .get_mut(document_id)
            .ok_or_else(|| CoreError::UnknownDocument(document_id.clone()))
    }
}

/// Sole owner of documents, their analyses and their conversations.
///
/// Documents are append-only: once tracked, an id is never removed or
/// reused, and a processing document is resolved at most once.
pub struct DocumentRegistry {
    inner: Mutex<RegistryState>,
    events: broadcast::Sender<ClientEvent>,
}

impl DocumentRegistry {
    pub fn new(events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            inner: Mutex::new(RegistryState::default()),
            events,
        }
    }

    /// Most recent upload first.
    pub async fn list_documents(&self) -> Vec<Document> {
        let guard = self.inner.lock().await;
        let mut entries: Vec<&DocumentEntry> = guard.documents.values().collect();
        entries.sort_by(|a, b| {
            b.document
                .uploaded_at
                .cmp(&a.document.uploaded_at)
                .then(b.seq.cmp(&a.seq))
        });
        entries
            .into_iter()
            .map(|entry| entry.document.clone())
            .collect()
    }

    pub async fn get_document(&self, document_id: &DocumentId) -> CoreResult<Document> {
        let guard = self.inner.lock().await;
        guard.document(document_id).cloned()
    }

    pub async fn history_synced_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().await.history_synced_at
    }

    /// Merges a history fetch. Documents already tracked keep their local
    /// state; returns how many were newly added.
    pub async fn apply_history(&self, documents: Vec<Document>) -> usize {
        let mut guard = self.inner.lock().await;
        let mut added = Vec::new();
        for document in documents {
            if guard.documents.contains_key(&document.id) {
                continue;
            }
            added.push(document.clone());
            guard.insert(document);
        }
        guard.history_synced_at = Some(Utc::now());
        drop(guard);

        info!("registry: history applied added={}", added.len());
        let count = added.len();
        for document in added {
            let _ = self.events.send(ClientEvent::DocumentChanged(document));
        }
        count
    }

    /// Tracks a new processing document under a fresh id derived from the
    /// file name and submission time.
    pub async fn begin_upload(&self, file: &UploadFile) -> CoreResult<Document> {
        let uploaded_at = Utc::now();
        let mut guard = self.inner.lock().await;
        let base = format!("{}-{}", slugify(&file.name), uploaded_at.timestamp_millis());
        let mut document_id = DocumentId::new(base.clone());
        let mut suffix = 1;
        while guard.documents.contains_key(&document_id) {
            suffix += 1;
            document_id = DocumentId::new(format!("{base}-{suffix}"));
        }
        let document = Document::processing(
            document_id,
            file.name.clone(),
            file.content_type.clone(),
            uploaded_at,
        );
        guard.insert(document.clone());
        drop(guard);

        self.announce_upload(&document);
        Ok(document)
    }

    /// Tracks a processing document under a caller-chosen id. Refuses ids
    /// that are already tracked, so one id never has two uploads in flight.
    pub async fn begin_upload_as(
        &self,
        document_id: DocumentId,
        file: &UploadFile,
        uploaded_at: DateTime<Utc>,
    ) -> CoreResult<Document> {
        let mut guard = self.inner.lock().await;
        if let Some(existing) = guard.documents.get(&document_id) {
            return Err(if existing.document.is_processing() {
                CoreError::UploadInFlight(document_id)
            } else {
                CoreError::AlreadyResolved(document_id)
            });
        }

        let document = Document::processing(
            document_id,
            file.name.clone(),
            file.content_type.clone(),
            uploaded_at,
        );
        guard.insert(document.clone());
        drop(guard);

        self.announce_upload(&document);
        Ok(document)
    }

    fn announce_upload(&self, document: &Document) {
        info!(
            "registry: upload started document={} name={}",
            document.id, document.name
        );
        let _ = self.events.send(ClientEvent::DocumentChanged(document.clone()));
    }

    pub async fn complete_upload(
        &self,
        document_id: &DocumentId,
        risk_level: RiskLevel,
        analysis: Analysis,
    ) -> CoreResult<Document> {
        self.resolve(
            document_id,
            DocumentState::Completed {
                risk_level,
                analysis,
            },
        )
        .await
    }

    pub async fn fail_upload(&self, document_id: &DocumentId, reason: &str) -> CoreResult<Document> {
        self.resolve(
            document_id,
            DocumentState::Error {
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn resolve(&self, document_id: &DocumentId, state: DocumentState) -> CoreResult<Document> {
        let mut guard = self.inner.lock().await;
        let entry = guard
            .documents
            .get_mut(document_id)
            .ok_or_else(|| CoreError::UnknownDocument(document_id.clone()))?;
        if !entry.document.is_processing() {
            warn!("registry: ignoring second resolution of document={document_id}");
            return Err(CoreError::AlreadyResolved(document_id.clone()));
        }
        entry.document.state = state;
        let document = entry.document.clone();
        drop(guard);

        info!(
            "registry: upload resolved document={} status={:?}",
            document.id,
            document.status()
        );
        let _ = self.events.send(ClientEvent::DocumentChanged(document.clone()));
        Ok(document)
    }

    pub async fn get_analysis(&self, document_id: &DocumentId) -> CoreResult<Analysis> {
        let guard = self.inner.lock().await;
        let Some(entry) = guard.documents.get(document_id) else {
            return Err(CoreError::not_found(
                document_id.clone(),
                NotFoundReason::Unknown,
            ));
        };
        match &entry.document.state {
            DocumentState::Completed { analysis, .. } => Ok(analysis.clone()),
            DocumentState::Processing => Err(CoreError::not_found(
                document_id.clone(),
                NotFoundReason::Processing,
            )),
            DocumentState::Error { .. } => Err(CoreError::not_found(
                document_id.clone(),
                NotFoundReason::Failed,
            )),
        }
    }

    /// Returns the document's conversation, creating and seeding it on first
    /// access. Later calls return the same transcript.
    pub async fn get_conversation(&self, document_id: &DocumentId) -> CoreResult<Conversation> {
        let mut guard = self.inner.lock().await;
        guard.conversation_mut(document_id).map(|conversation| conversation.clone())
    }

    /// Appends in call order. Serializing concurrent senders is the caller's job.
    pub async fn append_message(
        &self,
        document_id: &DocumentId,
        message: ChatMessage,
    ) -> CoreResult<ChatMessage> {
        let mut guard = self.inner.lock().await;
        let conversation = guard.conversation_mut(document_id)?;
        conversation.messages.push(message.clone());
        drop(guard);

        debug!(
            "registry: appended message document={document_id} message={} role={:?}",
            message.id, message.role
        );
        let _ = self.events.send(ClientEvent::MessageAppended {
            document_id: document_id.clone(),
            message: message.clone(),
        });
        Ok(message)
    }

    pub async fn set_delivery_status(
        &self,
        document_id: &DocumentId,
        message_id: &MessageId,
        status: DeliveryStatus,
    ) -> CoreResult<()> {
        let mut guard = self.inner.lock().await;
        let conversation = guard.conversation_mut(document_id)?;
        let message = conversation
            .messages
            .iter_mut()
            .find(|message| &message.id == message_id)
            .ok_or_else(|| CoreError::UnknownMessage {
                document_id: document_id.clone(),
                message_id: message_id.clone(),
            })?;
        message.delivery_status = Some(status);
        drop(guard);

        let _ = self.events.send(ClientEvent::MessageStatusChanged {
            document_id: document_id.clone(),
            message_id: message_id.clone(),
            status,
        });
        Ok(())
    }
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "document".to_string()
    } else {
        slug.to_string()
    }
}

#[cfg(test)]
#[path = "tests/registry_tests.rs"]
mod tests;
