//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use crate::db::Message;
use crate::export::{Delivery, ExportPayload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

// ============================================================================
// In-Memory Storage
// ============================================================================

/// Message store backed by a map
#[derive(Default)]
pub struct InMemoryStorage {
    messages: Mutex<HashMap<String, Vec<Message>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.messages
            .lock()
            .unwrap()
            .entry(message.session_id.clone())
            .or_default()
            .push(message);
    }
}

#[async_trait]
impl MessageStore for InMemoryStorage {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, String> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Mock Export Sink
// ============================================================================

/// Records deliveries; can be told to fail the next few
#[derive(Default)]
pub struct MockExportSink {
    pub deliveries: Mutex<Vec<(Delivery, ExportPayload)>>,
    failures_left: Mutex<u32>,
    previously_delivered: Vec<String>,
}

impl MockExportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries
    pub fn failing(count: u32) -> Self {
        Self {
            failures_left: Mutex::new(count),
            ..Self::default()
        }
    }

    /// Pretend these qualified ids were delivered before a restart
    pub fn with_history(ids: &[&str]) -> Self {
        Self {
            previously_delivered: ids.iter().map(|id| (*id).to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn recorded(&self) -> Vec<(Delivery, ExportPayload)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExportSink for MockExportSink {
    async fn deliver(
        &self,
        _session_id: &str,
        delivery: &Delivery,
        payload: &ExportPayload,
    ) -> Result<(), DeliveryError> {
        {
            let mut failures = self.failures_left.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(DeliveryError::Store("sink unavailable".to_string()));
            }
        }
        self.deliveries
            .lock()
            .unwrap()
            .push((delivery.clone(), payload.clone()));
        Ok(())
    }

    async fn delivered_ids(&self, _session_id: &str) -> Result<Vec<String>, String> {
        let mut ids = self.previously_delivered.clone();
        ids.extend(
            self.deliveries
                .lock()
                .unwrap()
                .iter()
                .map(|(delivery, _)| delivery.qualified_id()),
        );
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Session;
    use crate::export::token::{format_export_token, format_image_token};
    use crate::export::{ControlAction, ExportKind};
    use crate::runtime::executor::MAX_RETRY_ATTEMPTS;
    use crate::runtime::{SessionEvent, SessionRuntime, SseEvent};
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::{broadcast, mpsc};
    use tokio::task::JoinHandle;

    struct Harness {
        event_tx: mpsc::Sender<SessionEvent>,
        events: broadcast::Receiver<SseEvent>,
        sink: Arc<MockExportSink>,
        task: JoinHandle<()>,
        next: i64,
    }

    impl Harness {
        fn start(storage: InMemoryStorage, sink: MockExportSink) -> Self {
            let session = Session {
                id: "s1".to_string(),
                participants: ["alice".to_string(), "bob".to_string()],
                created_at: Utc::now(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            };
            let sink = Arc::new(sink);
            let (event_tx, event_rx) = mpsc::channel(32);
            let (broadcast_tx, events) = broadcast::channel(128);
            let runtime = SessionRuntime::new(
                &session,
                "Disappearo",
                Arc::new(storage),
                sink.clone(),
                event_rx,
                event_tx.clone(),
                broadcast_tx,
            );
            Self {
                event_tx,
                events,
                sink,
                task: tokio::spawn(runtime.run()),
                next: 0,
            }
        }

        fn message(&mut self, sender: &str, text: String) -> Message {
            self.next += 1;
            message(&format!("m{}", self.next), sender, text, self.next)
        }

        async fn send(&mut self, sender: &str, text: String) -> Message {
            let message = self.message(sender, text);
            self.event_tx
                .send(SessionEvent::MessageCreated(message.clone()))
                .await
                .unwrap();
            message
        }

        /// Send a chat message and wait until the runtime has processed it
        async fn sync(&mut self) {
            let marker = self.send("bob", "sync".to_string()).await;
            self.wait_for(|e| matches!(e, SseEvent::Message { message } if message.id == marker.id))
                .await;
        }

        async fn wait_for(&mut self, pred: impl Fn(&SseEvent) -> bool) -> SseEvent {
            loop {
                let event = tokio::time::timeout(Duration::from_secs(5), self.events.recv())
                    .await
                    .expect("timed out waiting for event")
                    .expect("broadcast closed");
                if pred(&event) {
                    return event;
                }
            }
        }
    }

    fn message(id: &str, sender: &str, text: String, offset: i64) -> Message {
        Message {
            id: id.to_string(),
            session_id: "s1".to_string(),
            sender: sender.to_string(),
            text,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap()
                + ChronoDuration::seconds(offset),
        }
    }

    fn json(action: ControlAction, id: &str) -> String {
        format_export_token(ExportKind::Json, action, id)
    }

    fn is_ready(event: &SseEvent) -> bool {
        matches!(event, SseEvent::ExportReady { .. })
    }

    fn is_error(event: &SseEvent) -> bool {
        matches!(event, SseEvent::Error { .. })
    }

    #[tokio::test]
    async fn test_requester_receives_export_once() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        h.send("alice", "hello".to_string()).await;
        h.send("alice", json(ControlAction::Request, "A")).await;
        h.send("alice", json(ControlAction::Approve, "A")).await;
        h.send("bob", json(ControlAction::Approve, "A")).await;

        let ready = h.wait_for(is_ready).await;
        assert!(ready.is_visible_to("alice"));
        assert!(!ready.is_visible_to("bob"));

        // More activity, duplicates included, never re-delivers
        let again = h.message("bob", json(ControlAction::Approve, "A"));
        h.event_tx
            .send(SessionEvent::MessageCreated(again))
            .await
            .unwrap();
        h.sync().await;
        h.sync().await;

        let recorded = h.sink.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0.recipient, "alice");
        assert_eq!(recorded[0].0.qualified_id(), "json:A");
        assert!(recorded[0].1.body.contains("hello"));
        assert!(!recorded[0].1.body.contains("__export"));
    }

    #[tokio::test]
    async fn test_bob_requested_export_goes_to_bob() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        h.send("bob", format_export_token(ExportKind::Txt, ControlAction::Request, "T"))
            .await;
        h.send("alice", format_export_token(ExportKind::Txt, ControlAction::Approve, "T"))
            .await;
        h.send("bob", format_export_token(ExportKind::Txt, ControlAction::Approve, "T"))
            .await;

        match h.wait_for(is_ready).await {
            SseEvent::ExportReady {
                recipient, kind, ..
            } => {
                assert_eq!(recipient, "bob");
                assert_eq!(kind, ExportKind::Txt);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delivery_backs_off_then_delivers() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::failing(3));
        h.send("alice", "hello".to_string()).await;
        h.send("alice", json(ControlAction::Request, "A")).await;
        h.send("alice", json(ControlAction::Approve, "A")).await;
        h.send("bob", json(ControlAction::Approve, "A")).await;

        let error = h.wait_for(is_error).await;
        assert!(error.is_visible_to("alice"));
        assert!(!error.is_visible_to("bob"));
        assert!(h.sink.recorded().is_empty());
        let first_failure = tokio::time::Instant::now();

        h.wait_for(is_error).await;
        h.wait_for(is_error).await;
        h.wait_for(is_ready).await;

        // Retries fire 1s, 2s and 4s apart
        assert!(first_failure.elapsed() >= Duration::from_secs(7));
        assert_eq!(h.sink.recorded().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_activity_restarts_exhausted_retries() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::failing(5));
        h.send("alice", json(ControlAction::Request, "A")).await;
        h.send("alice", json(ControlAction::Approve, "A")).await;
        h.send("bob", json(ControlAction::Approve, "A")).await;

        // First attempt plus every scheduled retry fails
        for _ in 0..=MAX_RETRY_ATTEMPTS {
            h.wait_for(is_error).await;
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(h.sink.recorded().is_empty());

        // Fresh streak: the immediate attempt fails, its first retry lands
        h.send("bob", "still there?".to_string()).await;
        h.wait_for(is_error).await;
        h.wait_for(is_ready).await;
        assert_eq!(h.sink.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_before_second_approval_blocks_delivery() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        h.send("alice", json(ControlAction::Request, "A")).await;
        h.send("alice", json(ControlAction::Approve, "A")).await;
        h.send("bob", json(ControlAction::Cancel, "A")).await;
        h.send("bob", json(ControlAction::Approve, "A")).await;
        h.sync().await;
        assert!(h.sink.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_export_state_broadcast_on_change_only() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        h.send("alice", json(ControlAction::Request, "A")).await;

        match h.wait_for(|e| matches!(e, SseEvent::ExportState { state } if state.active)).await {
            SseEvent::ExportState { state } => {
                assert_eq!(state.kind, ExportKind::Json);
                assert_eq!(state.request_id.as_deref(), Some("A"));
                assert_eq!(state.requested_by.as_deref(), Some("alice"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Plain chat and images leave export state untouched
        h.send("bob", format_image_token("https://x/y.png", "f", "y.png"))
            .await;
        let marker = h.send("bob", "plain".to_string()).await;
        let event = h
            .wait_for(|e| {
                matches!(e, SseEvent::ExportState { .. })
                    || matches!(e, SseEvent::Message { message } if message.id == marker.id)
            })
            .await;
        assert!(matches!(event, SseEvent::Message { .. }));
    }

    #[tokio::test]
    async fn test_restart_restores_timeline_and_guard() {
        let storage = InMemoryStorage::new();
        storage.push(message("a", "alice", json(ControlAction::Request, "A"), 1));
        storage.push(message("b", "alice", json(ControlAction::Approve, "A"), 2));
        storage.push(message("c", "bob", json(ControlAction::Approve, "A"), 3));

        let mut h = Harness::start(storage, MockExportSink::with_history(&["json:A"]));
        h.sync().await;
        assert!(h.sink.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_restart_delivers_pending_export() {
        let storage = InMemoryStorage::new();
        storage.push(message("a", "alice", json(ControlAction::Request, "A"), 1));
        storage.push(message("b", "alice", json(ControlAction::Approve, "A"), 2));
        storage.push(message("c", "bob", json(ControlAction::Approve, "A"), 3));

        let mut h = Harness::start(storage, MockExportSink::new());
        h.sync().await;
        assert_eq!(h.sink.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_end_stops_runtime() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        h.send("alice", "hello".to_string()).await;
        h.event_tx.send(SessionEvent::End).await.unwrap();

        h.wait_for(|e| matches!(e, SseEvent::SessionEnded)).await;
        tokio::time::timeout(Duration::from_secs(5), h.task)
            .await
            .expect("runtime did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_deleted_message_is_broadcast() {
        let mut h = Harness::start(InMemoryStorage::new(), MockExportSink::new());
        let sent = h.send("alice", "oops".to_string()).await;
        h.event_tx
            .send(SessionEvent::MessageDeleted {
                id: sent.id.clone(),
            })
            .await
            .unwrap();
        match h
            .wait_for(|e| matches!(e, SseEvent::MessageDeleted { .. }))
            .await
        {
            SseEvent::MessageDeleted { id } => assert_eq!(id, sent.id),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
