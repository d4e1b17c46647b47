//! Server-Sent Events support

use crate::runtime::SseEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert a session broadcast into one participant's SSE stream
pub fn sse_stream(
    init_event: SseEvent,
    broadcast_rx: tokio::sync::broadcast::Receiver<SseEvent>,
    handle: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = futures::stream::once(async move { Ok(sse_event_to_axum(init_event)) });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(move |result| match result {
        Ok(event) if event.is_visible_to(&handle) => Some(Ok(sse_event_to_axum(event))),
        _ => None, // Someone else's event, or lagged
    });

    let combined = init.chain(broadcasts);

    Sse::new(combined).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn sse_event_to_axum(event: SseEvent) -> Event {
    let (event_type, data) = match event {
        SseEvent::Init {
            session,
            messages,
            exports,
        } => (
            "init",
            json!({
                "type": "init",
                "session": session,
                "messages": messages,
                "exports": exports
            }),
        ),
        SseEvent::Message { message } => (
            "message",
            json!({
                "type": "message",
                "message": message
            }),
        ),
        SseEvent::MessageDeleted { id } => (
            "message_deleted",
            json!({
                "type": "message_deleted",
                "id": id
            }),
        ),
        SseEvent::ExportState { state } => (
            "export_state",
            json!({
                "type": "export_state",
                "state": state
            }),
        ),
        SseEvent::ExportReady {
            kind,
            request_id,
            file_name,
            ..
        } => (
            "export_ready",
            json!({
                "type": "export_ready",
                "kind": kind,
                "request_id": request_id,
                "file_name": file_name
            }),
        ),
        SseEvent::SessionEnded => (
            "session_ended",
            json!({
                "type": "session_ended"
            }),
        ),
        SseEvent::Error { message, .. } => (
            "error",
            json!({
                "type": "error",
                "message": message
            }),
        ),
    };

    Event::default().event(event_type).data(data.to_string())
}
