//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::db::{Database, Message, StoredExport};
use crate::export::{Delivery, ExportPayload};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

/// Why an export could not be handed to its recipient
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Failed to render transcript: {0}")]
    Render(String),
    #[error("Failed to store export: {0}")]
    Store(String),
}

/// Read access to a session's messages
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Get all messages for a session in creation order
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, String>;
}

/// Destination for rendered transcripts
#[async_trait]
pub trait ExportSink: Send + Sync {
    /// Hand a rendered transcript to the requester
    async fn deliver(
        &self,
        session_id: &str,
        delivery: &Delivery,
        payload: &ExportPayload,
    ) -> Result<(), DeliveryError>;

    /// Qualified ids already delivered for a session
    async fn delivered_ids(&self, session_id: &str) -> Result<Vec<String>, String>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: MessageStore + ?Sized> MessageStore for Arc<T> {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, String> {
        (**self).get_messages(session_id).await
    }
}

#[async_trait]
impl<T: ExportSink + ?Sized> ExportSink for Arc<T> {
    async fn deliver(
        &self,
        session_id: &str,
        delivery: &Delivery,
        payload: &ExportPayload,
    ) -> Result<(), DeliveryError> {
        (**self).deliver(session_id, delivery, payload).await
    }

    async fn delivered_ids(&self, session_id: &str) -> Result<Vec<String>, String> {
        (**self).delivered_ids(session_id).await
    }
}

// ============================================================================
// Production Adapters
// ============================================================================

/// Adapter to use Database as `MessageStore`
#[derive(Clone)]
pub struct DatabaseStorage {
    db: Database,
}

impl DatabaseStorage {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MessageStore for DatabaseStorage {
    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>, String> {
        self.db.get_messages(session_id).map_err(|e| e.to_string())
    }
}

/// Stores delivered transcripts for download by the requester
#[derive(Clone)]
pub struct DatabaseExportSink {
    db: Database,
}

impl DatabaseExportSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ExportSink for DatabaseExportSink {
    async fn deliver(
        &self,
        session_id: &str,
        delivery: &Delivery,
        payload: &ExportPayload,
    ) -> Result<(), DeliveryError> {
        let export = StoredExport {
            session_id: session_id.to_string(),
            qualified_id: delivery.qualified_id(),
            recipient: delivery.recipient.clone(),
            file_name: payload.file_name.clone(),
            content_type: payload.content_type.to_string(),
            body: payload.body.clone(),
            created_at: Utc::now(),
        };
        self.db
            .save_export(&export)
            .map_err(|e| DeliveryError::Store(e.to_string()))
    }

    async fn delivered_ids(&self, session_id: &str) -> Result<Vec<String>, String> {
        self.db
            .list_export_ids(session_id)
            .map_err(|e| e.to_string())
    }
}
