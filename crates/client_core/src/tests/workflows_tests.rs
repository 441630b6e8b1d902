use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use shared::{
    domain::{DocumentStatus, MessageRole, RiskLevel},
    protocol::UploadOutcome,
};

use super::*;
use crate::{
    event_channel,
    simulated::SimulatedBackend,
    test_support::{
        sample_analysis, upload_file, GatedUploadTransport, RecordingSink, ScriptedReplies,
    },
    MissingAnalysisFetch,
};

struct FixedAnalysis(Option<Analysis>);

#[async_trait]
impl AnalysisFetch for FixedAnalysis {
    async fn fetch(&self, _document_id: &DocumentId) -> Result<Option<Analysis>> {
        Ok(self.0.clone())
    }
}

struct BrokenHistory;

#[async_trait]
impl HistoryFetch for BrokenHistory {
    async fn fetch_history(&self) -> Result<Vec<Document>> {
        bail!("connection reset")
    }
}

struct PanickingTransport;

#[async_trait]
impl UploadTransport for PanickingTransport {
    async fn submit(&self, _document_id: &DocumentId, _file: &UploadFile) -> Result<UploadOutcome> {
        panic!("codec bug")
    }
}

fn registry() -> Arc<DocumentRegistry> {
    Arc::new(DocumentRegistry::new(event_channel()))
}

async fn completed_document(registry: &DocumentRegistry, name: &str) -> DocumentId {
    let document = registry
        .begin_upload(&upload_file(name))
        .await
        .expect("begin");
    registry
        .complete_upload(&document.id, RiskLevel::Low, sample_analysis(RiskLevel::Low))
        .await
        .expect("complete");
    document.id
}

#[tokio::test(start_paused = true)]
async fn upload_completes_and_reports_full_progress() {
    let registry = registry();
    let transport = Arc::new(GatedUploadTransport::succeeding(RiskLevel::Medium));
    let sink = Arc::new(RecordingSink::default());
    let uploads = UploadWorkflow::new(
        registry.clone(),
        transport.clone(),
        sink.clone(),
        Duration::from_millis(100),
    );

    let handle = uploads
        .start(upload_file("contract.pdf"))
        .await
        .expect("start");
    let document_id = handle.document().id.clone();
    let progress = handle.progress();
    assert!(registry
        .get_document(&document_id)
        .await
        .expect("tracked")
        .is_processing());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(*progress.borrow(), 30);
    let shown = format!("{handle:?}");
    assert!(shown.contains(document_id.as_str()), "{shown}");
    assert!(shown.contains("progress: 30"), "{shown}");

    transport.gate.notify_one();
    let document = handle.wait().await.expect("upload");

    assert_eq!(document.id, document_id);
    assert_eq!(document.risk_level(), Some(RiskLevel::Medium));
    assert_eq!(*progress.borrow(), PROGRESS_DONE);
    assert_eq!(
        sink.notices(),
        vec![(
            NoticeLevel::Success,
            "contract.pdf analyzed (medium risk)".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_upload_marks_document_error() {
    let registry = registry();
    let transport = Arc::new(GatedUploadTransport::failing("scanner offline"));
    let sink = Arc::new(RecordingSink::default());
    let uploads = UploadWorkflow::new(
        registry.clone(),
        transport.clone(),
        sink.clone(),
        Duration::from_millis(100),
    );

    let handle = uploads
        .start(upload_file("contract.pdf"))
        .await
        .expect("start");
    let document_id = handle.document().id.clone();
    let progress = handle.progress();
    tokio::time::sleep(Duration::from_millis(250)).await;

    transport.gate.notify_one();
    let err = handle.wait().await.expect_err("upload fails");

    assert_eq!(err, CoreError::TransportFailure("scanner offline".to_string()));
    let document = registry.get_document(&document_id).await.expect("tracked");
    assert_eq!(document.status(), DocumentStatus::Error);
    assert!(*progress.borrow() < PROGRESS_DONE);
    assert_eq!(
        sink.notices(),
        vec![(
            NoticeLevel::Error,
            "Upload of contract.pdf failed: scanner offline".to_string()
        )]
    );
}

#[tokio::test(start_paused = true)]
async fn panicking_transport_still_fails_the_document() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let uploads = UploadWorkflow::new(
        registry.clone(),
        Arc::new(PanickingTransport),
        sink.clone(),
        Duration::from_millis(100),
    );

    let handle = uploads
        .start(upload_file("contract.pdf"))
        .await
        .expect("start");
    let document_id = handle.document().id.clone();
    let err = handle.wait().await.expect_err("transport panicked");

    let CoreError::TransportFailure(reason) = err else {
        panic!("expected transport failure, got {err:?}");
    };
    assert!(reason.contains("upload transport stopped"), "{reason}");
    let document = registry.get_document(&document_id).await.expect("tracked");
    assert_eq!(document.status(), DocumentStatus::Error);
    assert_eq!(sink.count(NoticeLevel::Error), 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_handle_stops_ticker_but_not_upload() {
    let registry = registry();
    let transport = Arc::new(GatedUploadTransport::succeeding(RiskLevel::High));
    let sink = Arc::new(RecordingSink::default());
    let uploads = UploadWorkflow::new(
        registry.clone(),
        transport.clone(),
        sink.clone(),
        Duration::from_millis(100),
    );

    let handle = uploads
        .start(upload_file("lease.pdf"))
        .await
        .expect("start");
    let document_id = handle.document().id.clone();
    let progress = handle.progress();
    drop(handle);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(*progress.borrow(), 0);

    transport.gate.notify_one();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let document = registry.get_document(&document_id).await.expect("tracked");
    assert_eq!(document.risk_level(), Some(RiskLevel::High));
    assert_eq!(sink.count(NoticeLevel::Success), 1);
}

#[tokio::test(start_paused = true)]
async fn upload_defers_to_earlier_analysis_refresh() {
    let registry = registry();
    let transport = Arc::new(GatedUploadTransport::succeeding(RiskLevel::High));
    let sink = Arc::new(RecordingSink::default());
    let uploads = UploadWorkflow::new(
        registry.clone(),
        transport.clone(),
        sink.clone(),
        Duration::from_millis(100),
    );
    let analyses = AnalysisWorkflow::new(
        registry.clone(),
        Arc::new(FixedAnalysis(Some(sample_analysis(RiskLevel::Low)))),
        sink.clone(),
    );

    let handle = uploads
        .start(upload_file("nda.pdf"))
        .await
        .expect("start");
    let document_id = handle.document().id.clone();

    analyses.refresh(&document_id).await.expect("refresh");
    transport.gate.notify_one();
    let document = handle.wait().await.expect("upload");

    assert_eq!(document.risk_level(), Some(RiskLevel::Low));
    assert_eq!(sink.count(NoticeLevel::Success), 0);
    assert_eq!(
        registry
            .get_analysis(&document_id)
            .await
            .expect("analysis"),
        sample_analysis(RiskLevel::Low)
    );
}

#[tokio::test]
async fn analysis_open_fetches_while_processing() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document = registry
        .begin_upload(&upload_file("msa.pdf"))
        .await
        .expect("begin");

    let pending = AnalysisWorkflow::new(registry.clone(), Arc::new(FixedAnalysis(None)), sink.clone());
    let err = pending.open(&document.id).await.expect_err("not ready");
    assert_eq!(
        err,
        CoreError::not_found(document.id.clone(), NotFoundReason::Processing)
    );

    let ready = AnalysisWorkflow::new(
        registry.clone(),
        Arc::new(FixedAnalysis(Some(sample_analysis(RiskLevel::High)))),
        sink.clone(),
    );
    let analysis = ready.open(&document.id).await.expect("analysis");
    assert_eq!(analysis, sample_analysis(RiskLevel::High));
    let stored = registry.get_document(&document.id).await.expect("tracked");
    assert_eq!(stored.risk_level(), Some(RiskLevel::High));
}

#[tokio::test]
async fn analysis_open_uses_cache_once_completed() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document_id = completed_document(&registry, "msa.pdf").await;

    // The fetcher always fails, so success proves it was never asked.
    let analyses = AnalysisWorkflow::new(registry.clone(), Arc::new(MissingAnalysisFetch), sink.clone());
    let analysis = analyses.open(&document_id).await.expect("cached");
    assert_eq!(analysis, sample_analysis(RiskLevel::Low));
    assert!(sink.notices().is_empty());

    let err = analyses
        .open(&DocumentId::from("unknown-id"))
        .await
        .expect_err("unknown");
    assert_eq!(
        err,
        CoreError::not_found(DocumentId::from("unknown-id"), NotFoundReason::Unknown)
    );
}

#[tokio::test]
async fn analysis_fetch_failure_is_reported() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document = registry
        .begin_upload(&upload_file("msa.pdf"))
        .await
        .expect("begin");

    let analyses = AnalysisWorkflow::new(registry.clone(), Arc::new(MissingAnalysisFetch), sink.clone());
    let err = analyses.refresh(&document.id).await.expect_err("fails");

    assert!(matches!(err, CoreError::TransportFailure(_)));
    assert_eq!(sink.count(NoticeLevel::Error), 1);
    assert!(registry
        .get_document(&document.id)
        .await
        .expect("tracked")
        .is_processing());
}

#[tokio::test]
async fn chat_appends_question_and_reply() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document_id = completed_document(&registry, "msa.pdf").await;
    let chat = ChatWorkflow::new(registry.clone(), Arc::new(ScriptedReplies::echo()), sink.clone());

    let reply = chat
        .send(&document_id, "  What is the notice period?  ")
        .await
        .expect("reply");
    assert_eq!(reply.role, MessageRole::Assistant);
    assert_eq!(reply.content, "re: What is the notice period?");

    let conversation = registry
        .get_conversation(&document_id)
        .await
        .expect("conversation");
    assert_eq!(conversation.messages.len(), 3);
    let question = &conversation.messages[1];
    assert_eq!(question.role, MessageRole::User);
    assert_eq!(question.content, "What is the notice period?");
    assert_eq!(question.delivery_status, Some(DeliveryStatus::Sent));
    assert_eq!(conversation.messages[2], reply);
}

#[tokio::test]
async fn chat_reply_failure_keeps_question_marked_error() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document_id = completed_document(&registry, "msa.pdf").await;
    let chat = ChatWorkflow::new(registry.clone(), Arc::new(ScriptedReplies::failing()), sink.clone());

    let err = chat
        .send(&document_id, "Can I terminate early?")
        .await
        .expect_err("reply fails");
    assert_eq!(err, CoreError::TransportFailure("model overloaded".to_string()));

    let conversation = registry
        .get_conversation(&document_id)
        .await
        .expect("conversation");
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(
        conversation.messages[1].delivery_status,
        Some(DeliveryStatus::Error)
    );
    assert_eq!(sink.count(NoticeLevel::Error), 1);
}

#[tokio::test(start_paused = true)]
async fn abandoned_send_still_lands_the_reply() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let document_id = completed_document(&registry, "msa.pdf").await;
    let chat = ChatWorkflow::new(
        registry.clone(),
        Arc::new(ScriptedReplies {
            delay: Duration::from_millis(500),
            fail: false,
        }),
        sink.clone(),
    );

    // The view goes away while the reply is still being generated.
    let abandoned = tokio::time::timeout(Duration::from_millis(100), chat.send(&document_id, "hello")).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let conversation = registry
        .get_conversation(&document_id)
        .await
        .expect("conversation");
    assert_eq!(conversation.messages.len(), 3);
    assert_eq!(
        conversation.messages[1].delivery_status,
        Some(DeliveryStatus::Sent)
    );
    assert_eq!(conversation.messages[2].role, MessageRole::Assistant);
    assert_eq!(conversation.messages[2].content, "re: hello");

    // The next send still gets its turn.
    let reply = chat.send(&document_id, "again").await.expect("reply");
    assert_eq!(reply.content, "re: again");
    assert!(sink.notices().is_empty());
}

#[tokio::test]
async fn blank_chat_message_is_rejected() {
    let registry = registry();
    let document_id = completed_document(&registry, "msa.pdf").await;
    let chat = ChatWorkflow::new(
        registry.clone(),
        Arc::new(ScriptedReplies::echo()),
        Arc::new(RecordingSink::default()),
    );

    let err = chat.send(&document_id, "   ").await.expect_err("blank");
    assert!(matches!(err, CoreError::Validation(_)));
    let conversation = registry
        .get_conversation(&document_id)
        .await
        .expect("conversation");
    assert_eq!(conversation.messages.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_are_answered_in_order() {
    let registry = registry();
    let document_id = completed_document(&registry, "msa.pdf").await;
    let chat = ChatWorkflow::new(
        registry.clone(),
        Arc::new(ScriptedReplies {
            delay: Duration::from_millis(50),
            fail: false,
        }),
        Arc::new(RecordingSink::default()),
    );

    let sends = ["one", "two", "three"].map(|text| chat.send(&document_id, text));
    for reply in join_all(sends).await {
        reply.expect("reply");
    }

    let conversation = registry
        .get_conversation(&document_id)
        .await
        .expect("conversation");
    let contents: Vec<&str> = conversation.messages[1..]
        .iter()
        .map(|message| message.content.as_str())
        .collect();
    assert_eq!(
        contents,
        ["one", "re: one", "two", "re: two", "three", "re: three"]
    );
}

#[tokio::test]
async fn history_refresh_merges_and_survives_failure() {
    let registry = registry();
    let sink = Arc::new(RecordingSink::default());
    let local = registry
        .begin_upload(&upload_file("draft.pdf"))
        .await
        .expect("begin");

    let history = HistoryWorkflow::new(
        registry.clone(),
        Arc::new(SimulatedBackend::with_seeded_history(Duration::ZERO)),
        sink.clone(),
    );
    let documents = history.refresh().await.expect("refresh");
    assert_eq!(documents.len(), 3);
    assert_eq!(documents[0].id, local.id);
    assert!(documents[0].uploaded_at <= Utc::now());

    let broken = HistoryWorkflow::new(registry.clone(), Arc::new(BrokenHistory), sink.clone());
    let err = broken.refresh().await.expect_err("offline");
    assert!(matches!(err, CoreError::TransportFailure(_)));
    assert_eq!(registry.list_documents().await, documents);
    assert_eq!(sink.count(NoticeLevel::Error), 1);
}
