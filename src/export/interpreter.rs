//! Trigger decision on top of the fold
//!
//! `evaluate` is pure: given the timeline, the local participant and the
//! delivery guard it reports both export states and the deliveries this
//! participant should perform. The guard only changes through
//! [`ExportInterpreter::mark_delivered`], after the delivery succeeded.

use super::fold::fold_export_state;
use super::state::{DeliveredExports, ExportState, Timeline};
use super::token::ExportKind;

/// A transcript delivery the local participant owes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub kind: ExportKind,
    pub request_id: String,
    pub recipient: String,
}

impl Delivery {
    pub fn qualified_id(&self) -> String {
        self.kind.qualify(&self.request_id)
    }
}

/// Result of evaluating a timeline
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    pub json: ExportState,
    pub txt: ExportState,
    pub deliveries: Vec<Delivery>,
}

impl Evaluation {
    pub fn state(&self, kind: ExportKind) -> &ExportState {
        match kind {
            ExportKind::Json => &self.json,
            ExportKind::Txt => &self.txt,
        }
    }
}

/// Fold both kinds and decide which deliveries `local_handle` must perform
pub fn evaluate(timeline: &Timeline, local_handle: &str, delivered: &DeliveredExports) -> Evaluation {
    let json = fold_export_state(timeline, ExportKind::Json);
    let txt = fold_export_state(timeline, ExportKind::Txt);

    let deliveries = [(ExportKind::Json, &json), (ExportKind::Txt, &txt)]
        .into_iter()
        .filter_map(|(kind, state)| pending_delivery(kind, state, local_handle, delivered))
        .collect();

    Evaluation {
        json,
        txt,
        deliveries,
    }
}

fn pending_delivery(
    kind: ExportKind,
    state: &ExportState,
    local_handle: &str,
    delivered: &DeliveredExports,
) -> Option<Delivery> {
    if !state.is_approved() {
        return None;
    }
    if state.requested_by.as_deref() != Some(local_handle) {
        return None;
    }
    let request_id = state.request_id.as_deref()?;
    if delivered.contains(kind, request_id) {
        return None;
    }
    Some(Delivery {
        kind,
        request_id: request_id.to_string(),
        recipient: local_handle.to_string(),
    })
}

/// One participant's view of a session's export coordination
#[derive(Debug, Clone)]
pub struct ExportInterpreter {
    local_handle: String,
    delivered: DeliveredExports,
}

impl ExportInterpreter {
    pub fn new(local_handle: impl Into<String>) -> Self {
        Self {
            local_handle: local_handle.into(),
            delivered: DeliveredExports::new(),
        }
    }

    /// Start from deliveries that already happened
    pub fn with_delivered(mut self, delivered: DeliveredExports) -> Self {
        self.delivered = delivered;
        self
    }

    pub fn evaluate(&self, timeline: &Timeline) -> Evaluation {
        evaluate(timeline, &self.local_handle, &self.delivered)
    }

    /// Record a successful delivery so the request never fires again
    pub fn mark_delivered(&mut self, delivery: &Delivery) -> bool {
        self.delivered.mark(delivery.kind, &delivery.request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Message;
    use crate::export::token::{format_export_token, ControlAction};
    use chrono::{Duration, TimeZone, Utc};

    fn timeline(entries: &[(&str, String)]) -> Timeline {
        let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Timeline::from_messages(entries.iter().enumerate().map(|(i, (sender, text))| {
            Message {
                id: format!("m{i}"),
                session_id: "s1".to_string(),
                sender: (*sender).to_string(),
                text: text.clone(),
                created_at: base + Duration::seconds(i64::try_from(i).unwrap()),
            }
        }))
    }

    fn token(kind: ExportKind, action: ControlAction, id: &str) -> String {
        format_export_token(kind, action, id)
    }

    fn approved_json(id: &str) -> Timeline {
        timeline(&[
            ("alice", token(ExportKind::Json, ControlAction::Request, id)),
            ("alice", token(ExportKind::Json, ControlAction::Approve, id)),
            ("bob", token(ExportKind::Json, ControlAction::Approve, id)),
        ])
    }

    #[test]
    fn test_requester_delivers_once() {
        let entries = approved_json("A");
        let mut alice = ExportInterpreter::new("alice");

        let first = alice.evaluate(&entries);
        assert_eq!(first.deliveries.len(), 1);
        assert_eq!(first.deliveries[0].qualified_id(), "json:A");
        assert!(alice.mark_delivered(&first.deliveries[0]));

        let second = alice.evaluate(&entries);
        assert!(second.deliveries.is_empty());
        assert!(second.json.is_approved());
    }

    #[test]
    fn test_restored_guard_suppresses_delivery() {
        let entries = approved_json("A");
        let alice = ExportInterpreter::new("alice")
            .with_delivered(DeliveredExports::from_qualified(["json:A"]));
        assert!(alice.evaluate(&entries).deliveries.is_empty());
    }

    #[test]
    fn test_counterpart_never_delivers() {
        let entries = approved_json("A");
        let bob = ExportInterpreter::new("bob");

        let evaluation = bob.evaluate(&entries);
        assert!(evaluation.json.is_active());
        assert!(evaluation.deliveries.is_empty());
    }

    #[test]
    fn test_unmarked_delivery_retries() {
        let entries = approved_json("A");
        let alice = ExportInterpreter::new("alice");

        assert_eq!(alice.evaluate(&entries).deliveries.len(), 1);
        // Delivery failed, guard untouched
        assert_eq!(alice.evaluate(&entries).deliveries.len(), 1);
    }

    #[test]
    fn test_cancelled_request_does_not_deliver() {
        let mut entries = approved_json("A");
        entries.insert(Message {
            id: "cancel".to_string(),
            session_id: "s1".to_string(),
            sender: "bob".to_string(),
            text: token(ExportKind::Json, ControlAction::Cancel, "A"),
            created_at: Utc.timestamp_opt(1_700_000_100, 0).unwrap(),
        });
        let evaluation = ExportInterpreter::new("alice").evaluate(&entries);
        assert!(!evaluation.json.is_active());
        assert!(evaluation.deliveries.is_empty());
    }

    #[test]
    fn test_guard_is_scoped_by_kind() {
        let entries = timeline(&[
            ("alice", token(ExportKind::Json, ControlAction::Request, "X")),
            ("alice", token(ExportKind::Json, ControlAction::Approve, "X")),
            ("bob", token(ExportKind::Json, ControlAction::Approve, "X")),
            ("alice", token(ExportKind::Txt, ControlAction::Request, "X")),
            ("alice", token(ExportKind::Txt, ControlAction::Approve, "X")),
            ("bob", token(ExportKind::Txt, ControlAction::Approve, "X")),
        ]);
        let mut alice = ExportInterpreter::new("alice");

        let first = alice.evaluate(&entries);
        assert_eq!(first.deliveries.len(), 2);
        alice.mark_delivered(&first.deliveries[0]);

        let second = alice.evaluate(&entries);
        assert_eq!(second.deliveries.len(), 1);
        assert_eq!(second.deliveries[0].kind, ExportKind::Txt);
    }

    #[test]
    fn test_new_request_after_delivery_fires_again() {
        let mut entries = approved_json("A");
        let mut alice = ExportInterpreter::new("alice");
        let first = alice.evaluate(&entries);
        alice.mark_delivered(&first.deliveries[0]);

        let base = Utc.timestamp_opt(1_700_000_200, 0).unwrap();
        for (i, (sender, action)) in [
            ("alice", ControlAction::Request),
            ("alice", ControlAction::Approve),
            ("bob", ControlAction::Approve),
        ]
        .into_iter()
        .enumerate()
        {
            entries.insert(Message {
                id: format!("b{i}"),
                session_id: "s1".to_string(),
                sender: sender.to_string(),
                text: token(ExportKind::Json, action, "B"),
                created_at: base + Duration::seconds(i64::try_from(i).unwrap()),
            });
        }

        let second = alice.evaluate(&entries);
        assert_eq!(second.deliveries.len(), 1);
        assert_eq!(second.deliveries[0].request_id, "B");
    }
}
