//! Property-based tests for export coordination
//!
//! These tests verify key invariants hold across arbitrary message streams:
//! - Re-folding is idempotent and duplicate delivery changes nothing
//! - Approvals only ever belong to the latest request
//! - A cancel after the latest request wins over any later approval
//! - Only the requester is ever asked to deliver, at most once per request
//! - Transcripts never contain control tokens or images

use super::interpreter::ExportInterpreter;
use super::state::{ExportState, Timeline};
use super::token::{format_export_token, format_image_token, ControlAction, ExportKind};
use super::transcript::exportable;
use super::{fold_export_state, ChatItem};
use crate::db::Message;
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// Strategies
// ============================================================================

const HANDLES: [&str; 2] = ["alice", "bob"];
const REQUEST_IDS: [&str; 3] = ["r1", "r2", "r3"];

fn arb_handle() -> impl Strategy<Value = String> {
    prop::sample::select(HANDLES.to_vec()).prop_map(String::from)
}

fn arb_kind() -> impl Strategy<Value = ExportKind> {
    prop_oneof![Just(ExportKind::Json), Just(ExportKind::Txt)]
}

fn arb_action() -> impl Strategy<Value = ControlAction> {
    prop_oneof![
        Just(ControlAction::Request),
        Just(ControlAction::Approve),
        Just(ControlAction::Cancel),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        3 => (arb_kind(), arb_action(), prop::sample::select(REQUEST_IDS.to_vec()))
            .prop_map(|(kind, action, id)| format_export_token(kind, action, id)),
        2 => "[a-zA-Z ]{1,20}",
        1 => "[a-z]{1,8}".prop_map(|name| format_image_token("https://cdn/x", "f", &name)),
        1 => Just("__export_approve__|".to_string()),
    ]
}

/// Stamp `(sender, text)` pairs with ids and strictly increasing timestamps
fn stamp(entries: Vec<(String, String)>) -> Vec<Message> {
    let base = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    entries
        .into_iter()
        .enumerate()
        .map(|(i, (sender, text))| Message {
            id: format!("m{i}"),
            session_id: "s1".to_string(),
            sender,
            text,
            created_at: base + Duration::seconds(i64::try_from(i).unwrap()),
        })
        .collect()
}

fn arb_messages() -> impl Strategy<Value = Vec<Message>> {
    prop::collection::vec((arb_handle(), arb_text()), 0..30).prop_map(stamp)
}

/// Arbitrary history, then request `rc` and its cancel, then approvals and chat
fn arb_cancelled_request() -> impl Strategy<Value = (ExportKind, Vec<Message>)> {
    (
        arb_kind(),
        prop::collection::vec((arb_handle(), arb_text()), 0..10),
        arb_handle(),
        arb_handle(),
        prop::collection::vec((arb_handle(), any::<bool>()), 0..10),
    )
        .prop_map(|(kind, history, requester, canceller, tail)| {
            let mut entries = history;
            entries.push((requester, format_export_token(kind, ControlAction::Request, "rc")));
            entries.push((canceller, format_export_token(kind, ControlAction::Cancel, "rc")));
            entries.extend(tail.into_iter().map(|(sender, approve)| {
                let text = if approve {
                    format_export_token(kind, ControlAction::Approve, "rc")
                } else {
                    "still here".to_string()
                };
                (sender, text)
            }));
            (kind, stamp(entries))
        })
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_refold_is_idempotent(messages in arb_messages(), kind in arb_kind()) {
        let timeline = Timeline::from_messages(messages);
        prop_assert_eq!(fold_export_state(&timeline, kind), fold_export_state(&timeline, kind));
    }

    #[test]
    fn prop_duplicate_delivery_is_invisible(messages in arb_messages(), kind in arb_kind()) {
        let once = Timeline::from_messages(messages.clone());
        let twice = Timeline::from_messages(messages.iter().cloned().chain(messages.iter().rev().cloned()));
        prop_assert_eq!(once.entries().len(), twice.entries().len());
        prop_assert_eq!(fold_export_state(&once, kind), fold_export_state(&twice, kind));
    }

    #[test]
    fn prop_approvals_follow_latest_request(messages in arb_messages(), kind in arb_kind()) {
        let timeline = Timeline::from_messages(messages);
        let state = fold_export_state(&timeline, kind);

        // Reference: approvals of the latest request after its position
        let mut latest: Option<usize> = None;
        for (i, entry) in timeline.entries().iter().enumerate() {
            if let ChatItem::ExportRequest { kind: k, .. } = &entry.item {
                if *k == kind {
                    latest = Some(i);
                }
            }
        }
        match latest {
            None => prop_assert_eq!(state, ExportState::default()),
            Some(start) => {
                let request_id = state.request_id.clone().unwrap();
                for handle in &state.approvals {
                    let approved_after = timeline.entries()[start..].iter().any(|e| {
                        &e.message.sender == handle
                            && matches!(&e.item, ChatItem::ExportApprove { kind: k, request_id: r }
                                if *k == kind && *r == request_id)
                    });
                    prop_assert!(approved_after);
                }
            }
        }
    }

    #[test]
    fn prop_cancel_wins_over_later_approvals((kind, messages) in arb_cancelled_request()) {
        let timeline = Timeline::from_messages(messages);
        let state = fold_export_state(&timeline, kind);

        prop_assert_eq!(state.request_id.as_deref(), Some("rc"));
        prop_assert!(state.cancelled);
        prop_assert!(!state.is_active());
        prop_assert!(!state.is_approved());
        for handle in HANDLES {
            let evaluation = ExportInterpreter::new(handle).evaluate(&timeline);
            prop_assert!(evaluation.deliveries.iter().all(|d| d.kind != kind));
        }
    }

    #[test]
    fn prop_only_requester_delivers_at_most_once(messages in arb_messages()) {
        let timeline = Timeline::from_messages(messages);
        for handle in HANDLES {
            let mut interpreter = ExportInterpreter::new(handle);
            let first = interpreter.evaluate(&timeline);
            for delivery in &first.deliveries {
                let state = first.state(delivery.kind);
                prop_assert!(state.is_approved());
                prop_assert_eq!(state.requested_by.as_deref(), Some(handle));
                interpreter.mark_delivered(delivery);
            }
            prop_assert!(interpreter.evaluate(&timeline).deliveries.is_empty());
        }
    }

    #[test]
    fn prop_transcript_excludes_control_text(messages in arb_messages()) {
        let timeline = Timeline::from_messages(messages);
        for message in exportable(&timeline) {
            prop_assert!(!message.text.starts_with("__"));
        }
    }
}
