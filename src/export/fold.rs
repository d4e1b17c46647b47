//! Pure fold from a session timeline to export coordination state
//!
//! One reducer serves both export kinds; the kind selects which tokens
//! participate.

use super::state::{ExportState, Timeline};
use super::token::{ChatItem, ControlAction, ExportKind};

impl ExportState {
    /// Apply one timeline entry to the state
    ///
    /// Entries for another kind, ordinary chat, images and stale tokens leave
    /// the state untouched.
    pub fn apply(&mut self, kind: ExportKind, sender: &str, item: &ChatItem) {
        let Some((item_kind, action, request_id)) = item.export_control() else {
            return;
        };
        if item_kind != kind {
            return;
        }

        match action {
            ControlAction::Request => {
                self.request_id = Some(request_id.to_string());
                self.requested_by = Some(sender.to_string());
                self.approvals.clear();
                self.cancelled = false;
            }
            ControlAction::Cancel if self.is_current(request_id) => {
                self.cancelled = true;
            }
            ControlAction::Approve if self.is_current(request_id) => {
                self.approvals.insert(sender.to_string());
            }
            ControlAction::Cancel | ControlAction::Approve => {
                tracing::trace!(%kind, request_id, "Ignoring stale export token");
            }
        }
    }

    fn is_current(&self, request_id: &str) -> bool {
        self.request_id.as_deref() == Some(request_id)
    }
}

/// Fold the whole timeline, in its literal order, for one export kind
pub fn fold_export_state(timeline: &Timeline, kind: ExportKind) -> ExportState {
    timeline
        .entries()
        .iter()
        .fold(ExportState::default(), |mut state, entry| {
            state.apply(kind, &entry.message.sender, &entry.item);
            state
        })
}
