//! Runtime for live sessions
//!
//! One task per active session owns its timeline and export interpreters.
//! Handlers feed it events and subscribe to what it broadcasts.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::db::{Database, Message, Session};
use crate::export::{ExportKind, ExportSnapshot};
use std::collections::HashMap;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Type alias for production runtime with concrete implementations
pub type ProductionRuntime = SessionRuntime<DatabaseStorage, DatabaseExportSink>;

/// Events consumed by a session runtime
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message was stored; may arrive more than once
    MessageCreated(Message),
    MessageDeleted { id: String },
    /// Recompute export state, retrying pending deliveries
    Refold,
    End,
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init {
        session: Session,
        messages: Vec<Message>,
        exports: Vec<ExportSnapshot>,
    },
    Message {
        message: Message,
    },
    MessageDeleted {
        id: String,
    },
    ExportState {
        state: ExportSnapshot,
    },
    ExportReady {
        recipient: String,
        kind: ExportKind,
        request_id: String,
        file_name: String,
    },
    SessionEnded,
    Error {
        /// `None` for errors every participant should see
        recipient: Option<String>,
        message: String,
    },
}

impl SseEvent {
    pub fn is_visible_to(&self, handle: &str) -> bool {
        match self {
            SseEvent::ExportReady { recipient, .. } => recipient == handle,
            SseEvent::Error {
                recipient: Some(recipient),
                ..
            } => recipient == handle,
            _ => true,
        }
    }
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub event_tx: mpsc::Sender<SessionEvent>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
}

/// Manager for all session runtimes
pub struct RuntimeManager {
    db: Database,
    app_name: String,
    runtimes: RwLock<HashMap<String, SessionHandle>>,
}

impl RuntimeManager {
    pub fn new(db: Database, app_name: impl Into<String>) -> Self {
        Self {
            db,
            app_name: app_name.into(),
            runtimes: RwLock::new(HashMap::new()),
        }
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Get or start the runtime for a session
    pub async fn get_or_create(&self, session_id: &str) -> Result<SessionHandle, String> {
        {
            let runtimes = self.runtimes.read().await;
            if let Some(handle) = runtimes.get(session_id) {
                return Ok(handle.clone());
            }
        }

        let mut runtimes = self.runtimes.write().await;
        if let Some(handle) = runtimes.get(session_id) {
            return Ok(handle.clone());
        }

        let session = self.db.get_session(session_id).map_err(|e| e.to_string())?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let (broadcast_tx, _) = broadcast::channel(128);

        let runtime: ProductionRuntime = SessionRuntime::new(
            &session,
            self.app_name.clone(),
            DatabaseStorage::new(self.db.clone()),
            DatabaseExportSink::new(self.db.clone()),
            event_rx,
            event_tx.clone(),
            broadcast_tx.clone(),
        );
        tokio::spawn(runtime.run());

        let handle = SessionHandle {
            event_tx,
            broadcast_tx,
        };
        runtimes.insert(session_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub async fn send_event(&self, session_id: &str, event: SessionEvent) -> Result<(), String> {
        let handle = self.get_or_create(session_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|e| format!("Session runtime stopped: {e}"))
    }

    pub async fn subscribe(&self, session_id: &str) -> Result<broadcast::Receiver<SseEvent>, String> {
        let handle = self.get_or_create(session_id).await?;
        Ok(handle.broadcast_tx.subscribe())
    }

    /// Stop a session's runtime; subscribers receive `SessionEnded`
    pub async fn end_session(&self, session_id: &str) {
        let handle = self.runtimes.write().await.remove(session_id);
        if let Some(handle) = handle {
            let _ = handle.event_tx.send(SessionEvent::End).await;
        }
    }
}
