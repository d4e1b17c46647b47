//! Session runtime executor

use super::traits::{DeliveryError, ExportSink, MessageStore};
use super::{SessionEvent, SseEvent};

use crate::db::Session;
use crate::export::{
    transcript, DeliveredExports, Delivery, Evaluation, ExportInterpreter, ExportKind,
    ExportSnapshot, Timeline,
};
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// Scheduled retries per failure streak; new session activity starts a new streak
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Generic session runtime that can work with any store and sink
///
/// Owns the session timeline and one export interpreter per participant.
/// Every change to the timeline re-folds export state, broadcasts what
/// changed and performs the deliveries the interpreters ask for.
pub struct SessionRuntime<S, E>
where
    S: MessageStore + 'static,
    E: ExportSink + 'static,
{
    session_id: String,
    participants: [String; 2],
    app_name: String,
    timeline: Timeline,
    interpreters: Vec<ExportInterpreter>,
    /// Last broadcast export state per kind
    snapshots: HashMap<ExportKind, ExportSnapshot>,
    /// Failed delivery attempts in the current streak, keyed by qualified id
    retry_attempts: HashMap<String, u32>,
    storage: S,
    sink: E,
    event_rx: mpsc::Receiver<SessionEvent>,
    event_tx: mpsc::Sender<SessionEvent>,
    broadcast_tx: broadcast::Sender<SseEvent>,
}

impl<S, E> SessionRuntime<S, E>
where
    S: MessageStore + 'static,
    E: ExportSink + 'static,
{
    pub fn new(
        session: &Session,
        app_name: impl Into<String>,
        storage: S,
        sink: E,
        event_rx: mpsc::Receiver<SessionEvent>,
        event_tx: mpsc::Sender<SessionEvent>,
        broadcast_tx: broadcast::Sender<SseEvent>,
    ) -> Self {
        Self {
            session_id: session.id.clone(),
            participants: session.participants.clone(),
            app_name: app_name.into(),
            timeline: Timeline::new(),
            interpreters: session
                .participants
                .iter()
                .map(|handle| ExportInterpreter::new(handle.clone()))
                .collect(),
            snapshots: HashMap::new(),
            retry_attempts: HashMap::new(),
            storage,
            sink,
            event_rx,
            event_tx,
            broadcast_tx,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "Starting session runtime");

        if let Err(e) = self.restore().await {
            tracing::error!(session_id = %self.session_id, error = %e, "Failed to restore session");
            let _ = self.broadcast_tx.send(SseEvent::Error {
                recipient: None,
                message: format!("Failed to restore session: {e}"),
            });
        }
        self.refold().await;

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    if !self.process_event(event).await {
                        break;
                    }
                }
                else => break,
            }
        }

        tracing::info!(session_id = %self.session_id, "Session runtime stopped");
    }

    /// Load stored messages and the deliveries that already happened
    async fn restore(&mut self) -> Result<(), String> {
        for message in self.storage.get_messages(&self.session_id).await? {
            self.timeline.insert(message);
        }

        let delivered = DeliveredExports::from_qualified(
            self.sink.delivered_ids(&self.session_id).await?,
        );
        self.interpreters = self
            .participants
            .iter()
            .map(|handle| ExportInterpreter::new(handle.clone()).with_delivered(delivered.clone()))
            .collect();
        Ok(())
    }

    /// Returns false once the runtime should stop
    async fn process_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::MessageCreated(message) => {
                if self.timeline.insert(message.clone()) {
                    let _ = self.broadcast_tx.send(SseEvent::Message { message });
                    self.retry_attempts.clear();
                    self.refold().await;
                } else {
                    tracing::debug!(message_id = %message.id, "Duplicate message ignored");
                }
            }
            SessionEvent::MessageDeleted { id } => {
                if self.timeline.remove(&id) {
                    let _ = self.broadcast_tx.send(SseEvent::MessageDeleted { id });
                    self.retry_attempts.clear();
                    self.refold().await;
                }
            }
            SessionEvent::Refold => self.refold().await,
            SessionEvent::End => {
                self.timeline.clear();
                let _ = self.broadcast_tx.send(SseEvent::SessionEnded);
                return false;
            }
        }
        true
    }

    async fn refold(&mut self) {
        let evaluations: Vec<Evaluation> = self
            .interpreters
            .iter()
            .map(|interpreter| interpreter.evaluate(&self.timeline))
            .collect();

        // Participants fold the same timeline; only their deliveries differ
        if let Some(shared) = evaluations.first() {
            for kind in ExportKind::ALL {
                let snapshot = shared.state(kind).snapshot(kind);
                if self.snapshots.get(&kind) != Some(&snapshot) {
                    let _ = self.broadcast_tx.send(SseEvent::ExportState {
                        state: snapshot.clone(),
                    });
                    self.snapshots.insert(kind, snapshot);
                }
            }
        }

        let deliveries: Vec<(usize, Delivery)> = evaluations
            .into_iter()
            .enumerate()
            .flat_map(|(index, evaluation)| {
                evaluation
                    .deliveries
                    .into_iter()
                    .map(move |delivery| (index, delivery))
            })
            .collect();

        for (index, delivery) in deliveries {
            self.deliver(index, delivery).await;
        }
    }

    async fn deliver(&mut self, index: usize, delivery: Delivery) {
        let qualified_id = delivery.qualified_id();
        let result = match transcript::render(
            delivery.kind,
            &self.app_name,
            &self.session_id,
            &delivery.request_id,
            Utc::now(),
            &self.timeline,
        ) {
            Ok(payload) => self
                .sink
                .deliver(&self.session_id, &delivery, &payload)
                .await
                .map(|()| payload.file_name),
            Err(e) => Err(DeliveryError::Render(e.to_string())),
        };

        match result {
            Ok(file_name) => {
                if let Some(interpreter) = self.interpreters.get_mut(index) {
                    interpreter.mark_delivered(&delivery);
                }
                self.retry_attempts.remove(&qualified_id);
                tracing::info!(
                    session_id = %self.session_id,
                    export = %qualified_id,
                    recipient = %delivery.recipient,
                    "Export delivered"
                );
                let _ = self.broadcast_tx.send(SseEvent::ExportReady {
                    recipient: delivery.recipient,
                    kind: delivery.kind,
                    request_id: delivery.request_id,
                    file_name,
                });
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    export = %qualified_id,
                    error = %e,
                    "Export delivery failed"
                );
                let _ = self.broadcast_tx.send(SseEvent::Error {
                    recipient: Some(delivery.recipient),
                    message: format!("Export delivery failed: {e}"),
                });
                self.schedule_retry(qualified_id);
            }
        }
    }

    fn schedule_retry(&mut self, qualified_id: String) {
        let attempts = self.retry_attempts.entry(qualified_id.clone()).or_insert(0);
        *attempts += 1;
        let attempt = *attempts;

        if attempt > MAX_RETRY_ATTEMPTS {
            tracing::warn!(
                session_id = %self.session_id,
                export = %qualified_id,
                "No more scheduled retries, waiting for session activity"
            );
            return;
        }

        let delay = Duration::from_secs(1 << (attempt - 1));
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = event_tx.send(SessionEvent::Refold).await;
        });
    }
}
