use std::sync::Arc;

use evcal_adapters::{EventExtractor, ExtractionError, ReplyNotifier};
use evcal_core::{ExtractedEvent, IncomingMessage, WebhookEvent, WebhookPayload};
use evcal_storage::{StoreError, TableStore, TableWriteLocks};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{dedup, writer};

pub const DUPLICATE_NOTICE: &str = "資料庫已有此筆資料，無需重複新增。";

#[derive(Debug, Error)]
pub enum IngestFailure {
    #[error(transparent)]
    ExtractionFailed(#[from] ExtractionError),
    #[error(transparent)]
    StoreUnavailable(#[from] StoreError),
}

#[derive(Debug)]
pub enum IngestOutcome {
    NotATextMessage,
    Duplicate,
    Stored {
        event: ExtractedEvent,
        row_index: usize,
    },
    Failed(IngestFailure),
}

impl IngestOutcome {
    /// Status string reported back to the webhook caller.
    pub fn status(&self) -> &'static str {
        match self {
            IngestOutcome::NotATextMessage => "not a text message",
            IngestOutcome::Duplicate => "duplicate data",
            IngestOutcome::Stored { .. } => "success",
            IngestOutcome::Failed(_) => "error",
        }
    }

    pub fn error_message(&self) -> Option<String> {
        match self {
            IngestOutcome::Failed(failure) => Some(failure.to_string()),
            _ => None,
        }
    }

    /// Text sent to the sender, if any.
    pub fn reply_text(&self) -> Option<String> {
        match self {
            IngestOutcome::NotATextMessage => None,
            IngestOutcome::Duplicate => Some(DUPLICATE_NOTICE.to_string()),
            IngestOutcome::Stored { event, .. } => Some(confirmation_text(event)),
            IngestOutcome::Failed(failure) => Some(format!("處理訊息時發生錯誤：{failure}")),
        }
    }
}

pub fn confirmation_text(event: &ExtractedEvent) -> String {
    format!(
        "新增成功！\n\n活動名稱：{}\n開始時間：{}\n結束時間：{}\n活動地點：{}\n活動性質：{}",
        event.title,
        event.start_time,
        event.end_time.as_deref().unwrap_or_default(),
        event.location.as_deref().unwrap_or_default(),
        event.nature_or_default().label(),
    )
}

/// Dedup, extract, store, reply. One pipeline is shared by every request.
pub struct IngestPipeline {
    store: Arc<dyn TableStore>,
    extractor: Arc<dyn EventExtractor>,
    notifier: Arc<dyn ReplyNotifier>,
    locks: TableWriteLocks,
}

impl IngestPipeline {
    pub fn new(
        store: Arc<dyn TableStore>,
        extractor: Arc<dyn EventExtractor>,
        notifier: Arc<dyn ReplyNotifier>,
    ) -> Self {
        Self {
            store,
            extractor,
            notifier,
            locks: TableWriteLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Only the first event of a payload is processed.
    pub async fn handle_payload(&self, payload: &WebhookPayload) -> IngestOutcome {
        match payload.events.first() {
            Some(event) => self.handle_event(event).await,
            None => {
                info!("webhook payload carried no events");
                IngestOutcome::NotATextMessage
            }
        }
    }

    pub async fn handle_event(&self, event: &WebhookEvent) -> IngestOutcome {
        let invocation_id = Uuid::new_v4();
        let span = info_span!("ingest", %invocation_id);
        async {
            let Some(message) = IncomingMessage::from_event(event) else {
                info!(event_type = %event.event_type, "ignoring non-text event");
                return IngestOutcome::NotATextMessage;
            };
            info!(sender = message.sender_id.as_deref().unwrap_or("-"), "text message received");

            let outcome = self.ingest_text(&message.raw_text).await;
            if let Some(text) = outcome.reply_text() {
                self.send_reply(&message.reply_token, &text).await;
            }
            outcome
        }
        .instrument(span)
        .await
    }

    /// Runs dedup, extraction and storage for `raw_text` without replying.
    pub async fn ingest_text(&self, raw_text: &str) -> IngestOutcome {
        match self.try_ingest(raw_text).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                warn!(error = %failure, "ingestion failed");
                IngestOutcome::Failed(failure)
            }
        }
    }

    async fn try_ingest(&self, raw_text: &str) -> Result<IngestOutcome, IngestFailure> {
        if dedup::is_duplicate(self.store.as_ref(), raw_text).await? {
            info!("message already stored");
            return Ok(IngestOutcome::Duplicate);
        }

        let event = self.extractor.extract(raw_text).await?.with_raw_text(raw_text);
        let row_index = writer::append_event(self.store.as_ref(), &self.locks, &event).await?;
        info!(row_index, title = %event.title, "event stored");
        Ok(IngestOutcome::Stored { event, row_index })
    }

    async fn send_reply(&self, reply_token: &str, text: &str) {
        if reply_token.is_empty() {
            warn!("no reply token; reply skipped");
            return;
        }
        if let Err(err) = self.notifier.reply(reply_token, text).await {
            warn!(error = %err, "reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use evcal_adapters::NotifyError;
    use evcal_core::{CanonicalField, DraftError};
    use evcal_storage::{MemoryTable, TableSnapshot};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Extracts the first line as the title; texts containing "no title"
    /// fail validation.
    #[derive(Default)]
    struct FakeExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventExtractor for FakeExtractor {
        async fn extract(&self, text: &str) -> Result<ExtractedEvent, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("no title") {
                return Err(DraftError::MissingField(CanonicalField::Title).into());
            }
            Ok(ExtractedEvent {
                start_time: "2024-03-15 10:00".into(),
                title: text.lines().next().unwrap_or_default().trim().to_string(),
                location: Some("Taipei".into()),
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        replies: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl ReplyNotifier for RecordingNotifier {
        async fn reply(&self, reply_token: &str, text: &str) -> Result<(), NotifyError> {
            self.replies
                .lock()
                .await
                .push((reply_token.to_string(), text.to_string()));
            Ok(())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl TableStore for FailingStore {
        fn table_id(&self) -> String {
            "failing".into()
        }

        async fn read_table(&self) -> Result<TableSnapshot, StoreError> {
            Err(StoreError::SheetNotFound("行事曆總表".into()))
        }

        async fn append_row(&self, _cells: Vec<String>) -> Result<usize, StoreError> {
            Err(StoreError::SheetNotFound("行事曆總表".into()))
        }

        async fn set_header_row(&self, _names: Vec<String>) -> Result<(), StoreError> {
            Err(StoreError::SheetNotFound("行事曆總表".into()))
        }

        async fn format_cell_wrap(&self, _row: usize, _col: usize) -> Result<(), StoreError> {
            Err(StoreError::SheetNotFound("行事曆總表".into()))
        }
    }

    /// Reads from the wrapped table; every write fails.
    struct ReadOnlyStore(MemoryTable);

    #[async_trait]
    impl TableStore for ReadOnlyStore {
        fn table_id(&self) -> String {
            self.0.table_id()
        }

        async fn read_table(&self) -> Result<TableSnapshot, StoreError> {
            self.0.read_table().await
        }

        async fn append_row(&self, _cells: Vec<String>) -> Result<usize, StoreError> {
            Err(StoreError::Http {
                status: 403,
                body: "The caller does not have permission".into(),
            })
        }

        async fn set_header_row(&self, _names: Vec<String>) -> Result<(), StoreError> {
            Err(StoreError::Http {
                status: 403,
                body: "The caller does not have permission".into(),
            })
        }

        async fn format_cell_wrap(&self, _row: usize, _col: usize) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Harness {
        store: Arc<MemoryTable>,
        extractor: Arc<FakeExtractor>,
        notifier: Arc<RecordingNotifier>,
        pipeline: IngestPipeline,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTable::new("t"));
        let extractor = Arc::new(FakeExtractor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = IngestPipeline::new(store.clone(), extractor.clone(), notifier.clone());
        Harness {
            store,
            extractor,
            notifier,
            pipeline,
        }
    }

    fn text_event(text: &str, reply_token: &str) -> WebhookEvent {
        serde_json::from_value(serde_json::json!({
            "type": "message",
            "replyToken": reply_token,
            "source": { "type": "user", "userId": "U1" },
            "message": { "type": "text", "id": "m1", "text": text }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn new_message_is_stored_and_confirmed() {
        let h = harness();
        let outcome = h
            .pipeline
            .handle_event(&text_event("Spring Picnic\n3/15 10am", "r-1"))
            .await;
        assert_eq!(outcome.status(), "success");
        assert!(matches!(outcome, IngestOutcome::Stored { row_index: 2, .. }));

        let rows = h.store.rows().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].last().unwrap(), "Spring Picnic\n3/15 10am");

        let replies = h.notifier.replies.lock().await;
        assert_eq!(
            replies.as_slice(),
            &[(
                "r-1".to_string(),
                "新增成功！\n\n活動名稱：Spring Picnic\n開始時間：2024-03-15 10:00\n結束時間：\n活動地點：Taipei\n活動性質：其他"
                    .to_string()
            )]
        );
    }

    #[tokio::test]
    async fn resubmission_is_reported_as_duplicate_without_extraction() {
        let h = harness();
        h.pipeline.handle_event(&text_event("Spring Picnic", "r-1")).await;
        let outcome = h
            .pipeline
            .handle_event(&text_event("  Spring Picnic \n", "r-2"))
            .await;

        assert_eq!(outcome.status(), "duplicate data");
        assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.store.rows().await.len(), 2);
        let replies = h.notifier.replies.lock().await;
        assert_eq!(replies[1], ("r-2".to_string(), DUPLICATE_NOTICE.to_string()));
    }

    #[tokio::test]
    async fn extraction_failure_replies_with_error_and_stores_nothing() {
        let h = harness();
        let outcome = h
            .pipeline
            .handle_event(&text_event("something with no title", "r-1"))
            .await;

        assert_eq!(outcome.status(), "error");
        assert!(matches!(
            outcome,
            IngestOutcome::Failed(IngestFailure::ExtractionFailed(_))
        ));
        assert!(h.store.rows().await.is_empty());
        let replies = h.notifier.replies.lock().await;
        assert!(replies[0].1.starts_with("處理訊息時發生錯誤："));
        assert!(replies[0].1.contains("title"));
    }

    #[tokio::test]
    async fn store_failure_is_reported() {
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = IngestPipeline::new(
            Arc::new(FailingStore),
            Arc::new(FakeExtractor::default()),
            notifier.clone(),
        );
        let outcome = pipeline.handle_event(&text_event("Spring Picnic", "r-1")).await;

        assert!(matches!(
            outcome,
            IngestOutcome::Failed(IngestFailure::StoreUnavailable(StoreError::SheetNotFound(_)))
        ));
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("sheet not found: 行事曆總表")
        );
        assert_eq!(notifier.replies.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn write_failure_after_extraction_is_reported_once() {
        let store = Arc::new(ReadOnlyStore(MemoryTable::with_rows(
            "t",
            vec![CanonicalField::canonical_headers()],
        )));
        let extractor = Arc::new(FakeExtractor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let pipeline = IngestPipeline::new(store.clone(), extractor.clone(), notifier.clone());

        let outcome = pipeline.handle_event(&text_event("Spring Picnic", "r-1")).await;

        assert!(matches!(
            outcome,
            IngestOutcome::Failed(IngestFailure::StoreUnavailable(StoreError::Http { status: 403, .. }))
        ));
        assert_eq!(outcome.status(), "error");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);

        let replies = notifier.replies.lock().await;
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].0, "r-1");
        assert!(replies[0].1.starts_with("處理訊息時發生錯誤："));
        assert!(replies[0].1.contains("403"));

        assert_eq!(store.0.rows().await, vec![CanonicalField::canonical_headers()]);
    }

    #[tokio::test]
    async fn non_text_events_are_ignored_silently() {
        let h = harness();
        let sticker: WebhookEvent = serde_json::from_value(serde_json::json!({
            "type": "message",
            "replyToken": "r-1",
            "message": { "type": "sticker", "id": "m1" }
        }))
        .unwrap();
        let follow: WebhookEvent =
            serde_json::from_value(serde_json::json!({ "type": "follow", "replyToken": "r-2" }))
                .unwrap();

        for event in [sticker, follow] {
            let outcome = h.pipeline.handle_event(&event).await;
            assert_eq!(outcome.status(), "not a text message");
        }
        let empty = WebhookPayload {
            destination: None,
            events: Vec::new(),
        };
        assert_eq!(
            h.pipeline.handle_payload(&empty).await.status(),
            "not a text message"
        );
        assert!(h.notifier.replies.lock().await.is_empty());
        assert_eq!(h.extractor.calls.load(Ordering::SeqCst), 0);
        assert!(h.store.rows().await.is_empty());
    }

    #[tokio::test]
    async fn only_first_event_of_payload_is_processed() {
        let h = harness();
        let payload = WebhookPayload {
            destination: None,
            events: vec![text_event("First", "r-1"), text_event("Second", "r-2")],
        };
        h.pipeline.handle_payload(&payload).await;
        let rows = h.store.rows().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].last().unwrap(), "First");
    }

    #[tokio::test]
    async fn missing_reply_token_still_stores() {
        let h = harness();
        let outcome = h.pipeline.handle_event(&text_event("Spring Picnic", "")).await;
        assert_eq!(outcome.status(), "success");
        assert!(h.notifier.replies.lock().await.is_empty());
    }

    #[tokio::test]
    async fn sequential_submissions_to_headered_table_add_one_row_each() {
        let store = Arc::new(MemoryTable::with_rows(
            "t",
            vec![CanonicalField::canonical_headers()],
        ));
        let pipeline = IngestPipeline::new(
            store.clone(),
            Arc::new(FakeExtractor::default()),
            Arc::new(RecordingNotifier::default()),
        );
        for i in 0..5 {
            let outcome = pipeline.ingest_text(&format!("Event {i}")).await;
            assert!(matches!(outcome, IngestOutcome::Stored { row_index, .. } if row_index == i + 2));
        }
        let rows = store.rows().await;
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], CanonicalField::canonical_headers());
        assert!(rows[1..].iter().all(|r| r[0] == "2024-03-15 10:00"));
    }

    #[tokio::test]
    async fn concurrent_first_writes_create_one_header() {
        let h = harness();
        let pipeline = Arc::new(h.pipeline);
        let mut tasks = Vec::new();
        for i in 0..8 {
            let pipeline = pipeline.clone();
            tasks.push(tokio::spawn(async move {
                pipeline.ingest_text(&format!("Event {i}")).await.status()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), "success");
        }
        let rows = h.store.rows().await;
        assert_eq!(rows.len(), 9);
        assert_eq!(rows[0], CanonicalField::canonical_headers());
        assert_eq!(
            rows.iter()
                .filter(|r| r.first().map(String::as_str) == Some(CanonicalField::StartTime.header()))
                .count(),
            1
        );
    }
}
