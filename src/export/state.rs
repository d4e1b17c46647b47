//! Export coordination state and the session timeline it is derived from

use super::token::{ChatItem, ExportKind};
use crate::db::Message;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// Distinct approvals needed before an export fires
pub const REQUIRED_APPROVALS: usize = 2;

// ============================================================================
// Export State
// ============================================================================

/// Derived coordination state for one export kind
///
/// Never persisted; always recomputed by folding the timeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportState {
    pub request_id: Option<String>,
    pub requested_by: Option<String>,
    /// Handles that approved `request_id`
    pub approvals: BTreeSet<String>,
    pub cancelled: bool,
}

impl ExportState {
    pub fn is_active(&self) -> bool {
        self.request_id.is_some() && !self.cancelled
    }

    /// Active and approved by two distinct participants
    pub fn is_approved(&self) -> bool {
        self.is_active() && self.approvals.len() >= REQUIRED_APPROVALS
    }

    #[cfg(test)]
    pub fn has_approved(&self, handle: &str) -> bool {
        self.approvals.contains(handle)
    }

    pub fn snapshot(&self, kind: ExportKind) -> ExportSnapshot {
        ExportSnapshot {
            kind,
            active: self.is_active(),
            request_id: self.request_id.clone(),
            requested_by: self.requested_by.clone(),
            approvals: self.approvals.iter().cloned().collect(),
            cancelled: self.cancelled,
        }
    }
}

/// Wire view of an [`ExportState`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportSnapshot {
    pub kind: ExportKind,
    pub active: bool,
    pub request_id: Option<String>,
    pub requested_by: Option<String>,
    pub approvals: Vec<String>,
    pub cancelled: bool,
}

// ============================================================================
// Delivery Guard
// ============================================================================

/// Qualified request ids whose export has already been delivered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveredExports {
    ids: HashSet<String>,
}

impl DeliveredExports {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, kind: ExportKind, request_id: &str) -> bool {
        self.ids.contains(&kind.qualify(request_id))
    }

    /// Returns false if the id was already marked
    pub fn mark(&mut self, kind: ExportKind, request_id: &str) -> bool {
        self.ids.insert(kind.qualify(request_id))
    }

    /// Rebuild a guard from stored qualified ids (`json:<id>`, `txt:<id>`)
    pub fn from_qualified<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

// ============================================================================
// Timeline
// ============================================================================

/// A message paired with its parsed body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimelineEntry {
    pub message: Message,
    pub item: ChatItem,
}

/// Deduplicated, creation-ordered messages of one session
///
/// Ties on `created_at` keep arrival order.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let mut timeline = Self::new();
        for message in messages {
            timeline.insert(message);
        }
        timeline
    }

    /// Insert a message; returns false for a duplicate id
    pub fn insert(&mut self, message: Message) -> bool {
        if self.contains(&message.id) {
            return false;
        }
        let position = self
            .entries
            .iter()
            .rposition(|e| e.message.created_at <= message.created_at)
            .map_or(0, |i| i + 1);
        let item = ChatItem::parse(&message.text);
        self.entries.insert(position, TimelineEntry { message, item });
        true
    }

    /// Remove a message by id; returns false if it was not present
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.message.id != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|e| e.message.id == id)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    #[cfg(test)]
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
